use std::time::Duration;

use crate::{
    error::{Error, Result},
    orchestrator::{default_plan, PlannedCall},
    transport::{ProcessTransport, TcpClientTransport, Transport},
};

/// Runtime knobs for server connections.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a handler waits for the client to answer a sampling request.
    pub sampling_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sampling_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn with_sampling_timeout(mut self, timeout: Duration) -> Self {
        self.sampling_timeout = timeout;
        self
    }
}

/// Runtime knobs for a client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on connecting the transport plus the initialize handshake.
    pub connect_timeout: Duration,
    /// How long `close` waits for session tasks before aborting them.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

/// How the client reaches the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Spawn the server and talk over its stdin/stdout.
    Process { program: String, args: Vec<String> },
    /// Connect to a running server at `tcp://host:port` or `host:port`.
    Tcp { url: String },
}

impl TransportConfig {
    pub fn build(&self) -> Result<Box<dyn Transport>> {
        match self {
            TransportConfig::Process { program, args } => {
                if program.trim().is_empty() {
                    return Err(Error::Config("server program must not be empty".into()));
                }
                Ok(Box::new(ProcessTransport::new(program.clone(), args)))
            }
            TransportConfig::Tcp { url } => {
                if url.trim().is_empty() {
                    return Err(Error::Config("server address must not be empty".into()));
                }
                Ok(Box::new(TcpClientTransport::new(url)?))
            }
        }
    }
}

/// What the orchestrator does with the rest of the plan once a call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Report the failure and keep going.
    #[default]
    Continue,
    /// Report the failure and mark every later call as skipped.
    AbortRemaining,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub client_name: String,
    pub client_version: String,
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub failure_policy: FailurePolicy,
    /// Prompt whose first message becomes the session's background
    /// instruction.
    pub background_prompt: Option<String>,
    pub plan: Vec<PlannedCall>,
}

impl OrchestratorConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            client_name: "research-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            transport,
            session: SessionConfig::default(),
            failure_policy: FailurePolicy::default(),
            background_prompt: Some("get_job_template_prompt".to_string()),
            plan: default_plan(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_plan(mut self, plan: Vec<PlannedCall>) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_background_prompt(mut self, prompt: Option<String>) -> Self {
        self.background_prompt = prompt;
        self
    }
}
