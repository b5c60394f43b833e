use serde::{Deserialize, Serialize};

use super::{ImageContent, Role, TextContent};

/// Parameters of a `sampling/createMessage` request sent by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: i64,
}

impl CreateMessageParams {
    /// A single user message asking for a completion of `prompt`.
    pub fn from_prompt(prompt: impl Into<String>, max_tokens: i64) -> Self {
        Self {
            messages: vec![SamplingMessage {
                role: Role::User,
                content: SamplingContent::Text(TextContent::new(prompt)),
            }],
            system_prompt: None,
            max_tokens,
        }
    }

    /// All text message bodies joined by newlines.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| match &m.content {
                SamplingContent::Text(t) => Some(t.text.as_str()),
                SamplingContent::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageResult {
    pub role: Role,
    pub content: SamplingContent,
    pub model: String,
    /// Why the model stopped, e.g. `endTurn` or `maxTokens`.
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl CreateMessageResult {
    pub fn assistant_text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: SamplingContent::Text(TextContent::new(text)),
            model: model.into(),
            stop_reason: Some("endTurn".to_string()),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            SamplingContent::Text(t) => Some(&t.text),
            SamplingContent::Image(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: Role,
    pub content: SamplingContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SamplingContent {
    Text(TextContent),
    Image(ImageContent),
}
