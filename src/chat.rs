use async_trait::async_trait;
use tracing::{debug, info};

use crate::{error::Result, orchestrator::CallReport, schema::Role};

/// Label of the user turn recorded for a connectivity check.
pub const CHECK_LABEL: &str = "MCP check";

/// Prefix `user_text` with the background instruction, if there is one.
pub fn compose_request(background: &str, user_text: &str) -> String {
    if background.is_empty() {
        user_text.to_string()
    } else {
        format!("{background}\n{user_text}")
    }
}

/// One exchange recorded in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Outcomes of capability calls made for this turn, one line each.
    pub tool_outputs: Vec<String>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_outputs: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    turns: Vec<ChatTurn>,
}

impl ChatState {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }
}

/// A single request to the research model.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchRequest {
    pub input: String,
    pub instructions: Option<String>,
}

/// The downstream language model answering chat turns.
#[async_trait]
pub trait ResearchModel: Send + Sync {
    async fn complete(&self, request: ResearchRequest) -> Result<String>;
}

/// Owns one conversation. Every user turn is composed with the background
/// instruction captured from the server and sent to the model as one
/// request.
pub struct ChatController<M> {
    model: M,
    background: String,
    instructions: Option<String>,
    state: ChatState,
}

impl<M: ResearchModel> ChatController<M> {
    pub fn new(model: M, background: impl Into<String>) -> Self {
        Self {
            model,
            background: background.into(),
            instructions: None,
            state: ChatState::default(),
        }
    }

    /// System-level instructions sent with every request
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn background(&self) -> &str {
        &self.background
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Record `user_text`, ask the model, and record its answer. A failed
    /// request leaves the user turn in place and records no answer.
    pub async fn submit(&mut self, user_text: &str) -> Result<String> {
        self.state.push(ChatTurn::user(user_text));
        let input = compose_request(&self.background, user_text);
        debug!("Research request input: {}", input);

        let answer = self
            .model
            .complete(ResearchRequest {
                input,
                instructions: self.instructions.clone(),
            })
            .await?;
        self.state.push(ChatTurn::assistant(answer.clone()));
        Ok(answer)
    }

    /// Record a connectivity check: a user turn naming the check and an
    /// assistant turn carrying one line per call.
    pub fn record_check(&mut self, reports: &[CallReport]) {
        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!("Recording check with {} calls, {} unsuccessful", reports.len(), failed);
        self.state.push(ChatTurn::user(CHECK_LABEL));
        let mut turn = ChatTurn::assistant(format!(
            "{} of {} calls succeeded",
            reports.len() - failed,
            reports.len()
        ));
        turn.tool_outputs = reports.iter().map(CallReport::summary).collect();
        self.state.push(turn);
    }
}
