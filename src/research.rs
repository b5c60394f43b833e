//! The downstream research model and the client-side connection that lets
//! servers sample it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    chat::{ResearchModel, ResearchRequest},
    connection::ClientConn,
    error::{Error, Result},
    events::LogRecord,
    schema::{CreateMessageParams, CreateMessageResult, Implementation, LoggingLevel},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_RESEARCH_MODEL: &str = "o3-deep-research";
pub const DEFAULT_SAMPLING_MODEL: &str = "gpt-4o-mini";

/// Settings for reaching the model provider.
#[derive(Clone)]
pub struct ResearchConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model answering chat turns
    pub model: String,
    /// Model answering sampling requests from servers
    pub sampling_model: String,
}

impl std::fmt::Debug for ResearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("sampling_model", &self.sampling_model)
            .finish()
    }
}

impl ResearchConfig {
    /// Read `OPENAI_API_KEY` (required), `OPENAI_BASE_URL`, `RESEARCH_MODEL`
    /// and `SAMPLING_MODEL` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        Ok(Self {
            api_key,
            base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: lookup("RESEARCH_MODEL").unwrap_or_else(|| DEFAULT_RESEARCH_MODEL.to_string()),
            sampling_model: lookup("SAMPLING_MODEL")
                .unwrap_or_else(|| DEFAULT_SAMPLING_MODEL.to_string()),
        })
    }
}

/// Client for the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiResearchModel {
    client: reqwest::Client,
    config: ResearchConfig,
}

impl OpenAiResearchModel {
    pub fn new(config: ResearchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    async fn respond(
        &self,
        model: &str,
        input: &str,
        instructions: Option<&str>,
        web_search: bool,
    ) -> Result<String> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let mut body = json!({ "model": model, "input": input });
        if let Some(instructions) = instructions {
            body["instructions"] = json!(instructions);
        }
        if web_search {
            body["tools"] = json!([{ "type": "web_search_preview" }]);
        }

        debug!("POST {} model={}", url, model);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Transport(format!(
                "API request failed with status {status}: {error_text}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::Json(format!("invalid response body: {e}")))?;
        extract_output_text(&value)
            .ok_or_else(|| Error::Protocol("response carried no output text".into()))
    }

    /// Answer a server's sampling request with the sampling model.
    pub async fn sample(&self, params: &CreateMessageParams) -> Result<CreateMessageResult> {
        let text = self
            .respond(
                &self.config.sampling_model,
                &params.prompt_text(),
                params.system_prompt.as_deref(),
                false,
            )
            .await?;
        Ok(CreateMessageResult::assistant_text(
            self.config.sampling_model.clone(),
            text,
        ))
    }
}

#[async_trait]
impl ResearchModel for OpenAiResearchModel {
    async fn complete(&self, request: ResearchRequest) -> Result<String> {
        self.respond(
            &self.config.model,
            &request.input,
            request.instructions.as_deref(),
            true,
        )
        .await
    }
}

/// Concatenated text of every `output_text` block in a Responses API reply.
pub fn extract_output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let parts: Vec<&str> = response
        .get("output")?
        .as_array()?
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    (!parts.is_empty()).then(|| parts.concat())
}

/// Instructions for turning research findings into a final report.
pub fn report_instructions(today: NaiveDate) -> String {
    format!(
        r#"Based on all the research conducted, create a comprehensive, well-structured answer to the overall research brief:
<Research Brief>
The research question the user asked.
</Research Brief>

Today's date is {date}.

<Findings>
Everything gathered from tool calls and web searches while researching.
</Findings>

Write a detailed answer that:
1. Is organized with headings (# for the title, ## for sections, ### for subsections)
2. Includes specific facts and insights from the research
3. References sources in [Title](URL) format
4. Gives a balanced, thorough analysis covering everything relevant to the question
5. Ends with a "Sources" section listing every referenced link

Structure the report to fit the question: a comparison can cover each side and then contrast them, a list can be a single section, and an overview can walk through the main concepts before a conclusion.

For each section:
- Use simple, clear language
- Use ## for the section title
- Never refer to yourself as the writer of the report
- Do not describe what you are doing; just write the report

<Citation Rules>
- Assign each unique URL a single citation number in the text
- End with ### Sources listing each source with its number
- Number sources sequentially without gaps (1,2,3,4...)
- Put each source on its own line, for example:
  [1] Source Title: URL
  [2] Source Title: URL
</Citation Rules>
"#,
        date = today.format("%B %-d, %Y")
    )
}

/// Client hooks for the research client: sampling requests go to the
/// configured model, server log records are mirrored into `tracing`.
#[derive(Debug, Clone, Default)]
pub struct ResearchClientConn {
    model: Option<Arc<OpenAiResearchModel>>,
}

impl ResearchClientConn {
    pub fn new(model: Option<Arc<OpenAiResearchModel>>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ClientConn for ResearchClientConn {
    async fn on_connect(&self, server: &Implementation) -> Result<()> {
        info!("Session established with {} {}", server.name, server.version);
        Ok(())
    }

    async fn on_disconnect(&self) -> Result<()> {
        info!("Session with server ended");
        Ok(())
    }

    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        match &self.model {
            Some(model) => model.sample(&params).await,
            None => Err(Error::MethodNotFound("sampling/createMessage".to_string())),
        }
    }

    async fn on_log(&self, record: LogRecord) {
        let logger = record.logger.as_deref().unwrap_or("default");
        match record.level {
            LoggingLevel::Debug => debug!("[Server Log - DEBUG] {}: {}", logger, record.data),
            LoggingLevel::Info | LoggingLevel::Notice => {
                info!("[Server Log - {}] {}: {}", record.level.as_str().to_uppercase(), logger, record.data)
            }
            LoggingLevel::Warning => warn!("[Server Log - WARNING] {}: {}", logger, record.data),
            _ => error!("[Server Log - {}] {}: {}", record.level.as_str().to_uppercase(), logger, record.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_requires_api_key() {
        let err = ResearchConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let env: HashMap<&str, &str> =
            [("OPENAI_API_KEY", "sk-test"), ("RESEARCH_MODEL", "o4-mini-deep-research")].into();
        let config = ResearchConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model, "o4-mini-deep-research");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!format!("{config:?}").contains("sk-test"));
    }

    #[test]
    fn test_extract_output_text() {
        let response = json!({
            "output": [
                {"type": "web_search_call", "status": "completed"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello, "},
                    {"type": "output_text", "text": "world"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&response).as_deref(), Some("Hello, world"));
        assert_eq!(extract_output_text(&json!({"output": []})), None);
        assert_eq!(
            extract_output_text(&json!({"output_text": "direct"})).as_deref(),
            Some("direct")
        );
    }

    #[test]
    fn test_report_instructions_carry_date() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        assert!(report_instructions(date).contains("Today's date is July 4, 2025."));
    }

    #[tokio::test]
    async fn test_sampling_refused_without_model() {
        let conn = ResearchClientConn::default();
        let err = conn
            .create_message(CreateMessageParams::from_prompt("hi", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }
}
