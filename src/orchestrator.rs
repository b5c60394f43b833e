use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::{
    api::ServerAPI,
    arguments::Arguments,
    client::Client,
    config::{FailurePolicy, OrchestratorConfig},
    connection::ClientConn,
    error::{Error, Result},
    schema::*,
};

/// Lifecycle of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Disconnected,
    Connecting,
    Discovering,
    Invoking,
    Closing,
}

/// One step of the invocation plan.
#[derive(Debug, Clone)]
pub enum PlannedCall {
    CallTool { name: String, arguments: Arguments },
    ReadResource { uri: String },
    GetPrompt { name: String, arguments: Arguments },
    Ping,
}

impl PlannedCall {
    pub fn tool(name: impl Into<String>, arguments: Arguments) -> Self {
        PlannedCall::CallTool {
            name: name.into(),
            arguments,
        }
    }

    pub fn resource(uri: impl Into<String>) -> Self {
        PlannedCall::ReadResource { uri: uri.into() }
    }

    pub fn prompt(name: impl Into<String>, arguments: Arguments) -> Self {
        PlannedCall::GetPrompt {
            name: name.into(),
            arguments,
        }
    }

    pub fn label(&self) -> String {
        match self {
            PlannedCall::CallTool { name, .. } => format!("tool {name}"),
            PlannedCall::ReadResource { uri } => format!("resource {uri}"),
            PlannedCall::GetPrompt { name, .. } => format!("prompt {name}"),
            PlannedCall::Ping => "ping".to_string(),
        }
    }
}

/// The fixed sequence a connectivity check exercises against the research
/// server.
pub fn default_plan() -> Vec<PlannedCall> {
    vec![
        PlannedCall::tool(
            "process_items",
            Arguments::new().with(
                "items",
                json!(["remote client", "remote server", "MCP tool"]),
            ),
        ),
        PlannedCall::tool("echo", Arguments::from([("message", "Hello, MCP!")])),
        PlannedCall::tool("get_current_time", Arguments::new()),
        PlannedCall::tool(
            "summarize_document",
            Arguments::from([("document_uri", "data://config")]),
        ),
        PlannedCall::resource("data://config"),
        PlannedCall::resource("greeting://Remote Client"),
        PlannedCall::prompt(
            "get_google_news_search_prompt",
            Arguments::from([("keyword", "latest trends in AI")]),
        ),
        PlannedCall::prompt("get_weather_prompt", Arguments::from([("city", "Hokkaido")])),
        PlannedCall::prompt("get_job_template_prompt", Arguments::new()),
        PlannedCall::Ping,
    ]
}

#[derive(Debug, Clone)]
pub enum CallOutcome {
    Tool(CallToolResult),
    Resource(ReadResourceResult),
    Prompt(GetPromptResult),
    Pong,
    Failed(Error),
    /// Not attempted because an earlier call failed under
    /// `FailurePolicy::AbortRemaining`.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CallReport {
    pub label: String,
    pub outcome: CallOutcome,
}

impl CallReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, CallOutcome::Failed(_) | CallOutcome::Skipped)
    }

    /// One-line rendering of the outcome.
    pub fn summary(&self) -> String {
        let detail = match &self.outcome {
            CallOutcome::Tool(result) => match (&result.structured_content, result.text()) {
                (Some(structured), _) => structured.to_string(),
                (None, Some(text)) => text.to_string(),
                (None, None) => "(no content)".to_string(),
            },
            CallOutcome::Resource(result) => result
                .contents
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            CallOutcome::Prompt(result) => result.first_text().unwrap_or("(empty)").to_string(),
            CallOutcome::Pong => "pong".to_string(),
            CallOutcome::Failed(e) => format!("failed: {e}"),
            CallOutcome::Skipped => "skipped".to_string(),
        };
        format!("{}: {}", self.label, detail)
    }
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// What a run learned about the server.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub resource_templates: Vec<ResourceTemplate>,
    pub prompts: Vec<Prompt>,
    background_instruction: Option<String>,
}

impl SessionState {
    /// The captured background instruction, or the empty string.
    pub fn background_instruction(&self) -> &str {
        self.background_instruction.as_deref().unwrap_or("")
    }

    /// Capture the background instruction. Only the first capture sticks;
    /// returns whether this one did.
    pub fn set_background_instruction(&mut self, text: impl Into<String>) -> bool {
        if self.background_instruction.is_some() {
            return false;
        }
        self.background_instruction = Some(text.into());
        true
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: SessionState,
    pub calls: Vec<CallReport>,
    pub transitions: Vec<OrchestratorState>,
    pub server: Option<Implementation>,
    pub discovery_errors: Vec<(String, Error)>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &CallReport> {
        self.calls.iter().filter(|c| !c.is_success())
    }
}

/// Drives one connectivity check against a server: connect, discover,
/// execute the plan, close.
pub struct ClientOrchestrator<C: ClientConn + Clone = ()> {
    config: OrchestratorConfig,
    connection: C,
    transitions: Vec<OrchestratorState>,
}

impl ClientOrchestrator<()> {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_connection(config, ())
    }
}

impl<C: ClientConn + Clone> ClientOrchestrator<C> {
    pub fn with_connection(config: OrchestratorConfig, connection: C) -> Self {
        Self {
            config,
            connection,
            transitions: vec![OrchestratorState::Disconnected],
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// States visited by the last run, starting and ending at
    /// `Disconnected`.
    pub fn transitions(&self) -> &[OrchestratorState] {
        &self.transitions
    }

    /// Run the check over the configured transport.
    pub async fn run(&mut self) -> Result<RunReport> {
        let transport = self.config.transport.build()?;
        self.run_with_transport(transport).await
    }

    pub async fn run_with_transport(
        &mut self,
        transport: Box<dyn crate::transport::Transport>,
    ) -> Result<RunReport> {
        self.transitions = vec![OrchestratorState::Disconnected];
        let client = Client::new_with_connection(
            self.config.client_name.clone(),
            self.config.client_version.clone(),
            self.connection.clone(),
        )
        .with_config(self.config.session.clone());
        let mut run = RunGuard {
            client: Arc::new(client),
            transitions: &mut self.transitions,
            closed: false,
        };

        run.enter(OrchestratorState::Connecting);
        let initialized = match run.client.open(transport).await {
            Ok(initialized) => initialized,
            Err(e) => {
                run.close().await;
                return Err(e);
            }
        };

        run.enter(OrchestratorState::Discovering);
        let mut state = SessionState::default();
        let discovery_errors = discover(run.client.as_ref(), &mut state).await;

        run.enter(OrchestratorState::Invoking);
        let calls = execute_plan(
            run.client.as_ref(),
            &self.config.plan,
            self.config.failure_policy,
            self.config.background_prompt.as_deref(),
            &mut state,
        )
        .await;

        run.close().await;
        drop(run);

        Ok(RunReport {
            state,
            calls,
            transitions: self.transitions.clone(),
            server: Some(initialized.server_info),
            discovery_errors,
        })
    }
}

/// Owns the client for the length of a run. A run that ends without
/// reaching `close` (dropped future, panic) still passes through `Closing`
/// and `Disconnected`, and its session is closed on a background task.
struct RunGuard<'a, C: ClientConn> {
    client: Arc<Client<C>>,
    transitions: &'a mut Vec<OrchestratorState>,
    closed: bool,
}

impl<C: ClientConn> RunGuard<'_, C> {
    fn enter(&mut self, state: OrchestratorState) {
        info!("Orchestrator: {:?}", state);
        self.transitions.push(state);
    }

    async fn close(&mut self) {
        self.enter(OrchestratorState::Closing);
        if let Err(e) = self.client.close().await {
            warn!("Error while closing session: {}", e);
        }
        self.closed = true;
        self.enter(OrchestratorState::Disconnected);
    }
}

impl<C: ClientConn> Drop for RunGuard<'_, C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("Run interrupted, closing session");
        if self.transitions.last() != Some(&OrchestratorState::Closing) {
            self.enter(OrchestratorState::Closing);
        }
        // Without a runtime, dropping the last handle tears the session down.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            runtime.spawn(async move {
                if let Err(e) = client.close().await {
                    warn!("Error while closing interrupted session: {}", e);
                }
            });
        }
        self.enter(OrchestratorState::Disconnected);
    }
}

/// List every capability kind into `state`. Failures are collected, not
/// propagated.
pub async fn discover<A: ServerAPI + ?Sized>(
    api: &A,
    state: &mut SessionState,
) -> Vec<(String, Error)> {
    let mut errors = Vec::new();
    match api.list_tools().await {
        Ok(result) => state.tools = result.tools,
        Err(e) => errors.push(("tools/list".to_string(), e)),
    }
    match api.list_resources().await {
        Ok(result) => state.resources = result.resources,
        Err(e) => errors.push(("resources/list".to_string(), e)),
    }
    match api.list_resource_templates().await {
        Ok(result) => state.resource_templates = result.resource_templates,
        Err(e) => errors.push(("resources/templates/list".to_string(), e)),
    }
    match api.list_prompts().await {
        Ok(result) => state.prompts = result.prompts,
        Err(e) => errors.push(("prompts/list".to_string(), e)),
    }
    for (what, e) in &errors {
        warn!("Discovery step {} failed: {}", what, e);
    }
    info!(
        "Discovered {} tools, {} resources, {} resource templates, {} prompts",
        state.tools.len(),
        state.resources.len(),
        state.resource_templates.len(),
        state.prompts.len()
    );
    errors
}

/// Execute `plan` call by call. A failing call is recorded and, depending on
/// `policy`, either the rest still run or they are reported as skipped.
pub async fn execute_plan<A: ServerAPI + ?Sized>(
    api: &A,
    plan: &[PlannedCall],
    policy: FailurePolicy,
    background_prompt: Option<&str>,
    state: &mut SessionState,
) -> Vec<CallReport> {
    let mut reports = Vec::with_capacity(plan.len());
    let mut aborted = false;

    for call in plan {
        let label = call.label();
        if aborted {
            reports.push(CallReport {
                label,
                outcome: CallOutcome::Skipped,
            });
            continue;
        }

        let outcome = match call {
            PlannedCall::CallTool { name, arguments } => api
                .call_tool(name, arguments.clone())
                .await
                .map(CallOutcome::Tool),
            PlannedCall::ReadResource { uri } => {
                api.read_resource(uri).await.map(CallOutcome::Resource)
            }
            PlannedCall::GetPrompt { name, arguments } => {
                match api.get_prompt(name, arguments.clone()).await {
                    Ok(result) => {
                        if background_prompt == Some(name.as_str()) {
                            if let Some(text) = result.first_text() {
                                if state.set_background_instruction(text) {
                                    info!("Captured background instruction from '{}'", name);
                                }
                            }
                        }
                        Ok(CallOutcome::Prompt(result))
                    }
                    Err(e) => Err(e),
                }
            }
            PlannedCall::Ping => api.ping().await.map(|_| CallOutcome::Pong),
        };

        let outcome = outcome.unwrap_or_else(|e| {
            warn!("{} failed: {}", label, e);
            if policy == FailurePolicy::AbortRemaining {
                aborted = true;
            }
            CallOutcome::Failed(e)
        });
        reports.push(CallReport { label, outcome });
    }
    reports
}
