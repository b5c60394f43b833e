use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::LATEST_PROTOCOL_VERSION;

/// Capabilities a client may support.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    /// Present if the client supports sampling from an LLM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

impl ClientCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling(mut self) -> Self {
        self.sampling = Some(empty());
        self
    }
}

/// Capabilities a server advertises. Each is an empty object when present:
/// the catalog is fixed for the life of a server, so there are no
/// `listChanged` or subscription flags to announce.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

impl ServerCapabilities {
    pub fn with_logging(mut self) -> Self {
        self.logging = Some(empty());
        self
    }

    pub fn with_prompts(mut self) -> Self {
        self.prompts = Some(empty());
        self
    }

    pub fn with_resources(mut self) -> Self {
        self.resources = Some(empty());
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.tools = Some(empty());
        self
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

/// Describes the name and version of an MCP implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Sent by the server in answer to `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// The protocol version the server wants to use. If the client cannot
    /// support it, the client must disconnect.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    /// Instructions describing how to use the server and its features.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    pub fn new(server_info: Implementation) -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info,
            instructions: None,
        }
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }
}
