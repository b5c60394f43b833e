use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::*;
use crate::arguments::Arguments;
use crate::request_handler::RequestMethod;

// Messages sent from the client to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub(crate) enum ClientRequest {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "initialize")]
    Initialize {
        /// The latest protocol version the client supports.
        #[serde(rename = "protocolVersion")]
        protocol_version: String,
        capabilities: ClientCapabilities,
        #[serde(rename = "clientInfo")]
        client_info: Implementation,
    },
    #[serde(rename = "logging/setLevel")]
    SetLevel {
        /// The minimum level the client wants to receive.
        level: LoggingLevel,
    },
    #[serde(rename = "prompts/get")]
    GetPrompt {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Arguments>,
    },
    #[serde(rename = "prompts/list")]
    ListPrompts,
    #[serde(rename = "resources/list")]
    ListResources,
    #[serde(rename = "resources/templates/list")]
    ListResourceTemplates,
    #[serde(rename = "resources/read")]
    ReadResource { uri: String },
    #[serde(rename = "tools/call")]
    CallTool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Arguments>,
    },
    #[serde(rename = "tools/list")]
    ListTools,
}

impl RequestMethod for ClientRequest {
    fn method(&self) -> &'static str {
        match self {
            ClientRequest::Ping => "ping",
            ClientRequest::Initialize { .. } => "initialize",
            ClientRequest::SetLevel { .. } => "logging/setLevel",
            ClientRequest::GetPrompt { .. } => "prompts/get",
            ClientRequest::ListPrompts => "prompts/list",
            ClientRequest::ListResources => "resources/list",
            ClientRequest::ListResourceTemplates => "resources/templates/list",
            ClientRequest::ReadResource { .. } => "resources/read",
            ClientRequest::CallTool { .. } => "tools/call",
            ClientRequest::ListTools => "tools/list",
        }
    }
}

/// Notifications sent from the client to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ClientNotification {
    /// Sent after the `initialize` response has been received.
    #[serde(rename = "notifications/initialized")]
    Initialized,

    /// The client no longer wants the result of the named request; the
    /// server should stop working on it and must not answer it.
    #[serde(rename = "notifications/cancelled")]
    Cancelled {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Requests sent from the server to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ServerRequest {
    #[serde(rename = "ping")]
    Ping,

    /// Ask the client to sample its own language model.
    #[serde(rename = "sampling/createMessage")]
    CreateMessage(Box<CreateMessageParams>),
}

impl RequestMethod for ServerRequest {
    fn method(&self) -> &'static str {
        match self {
            ServerRequest::Ping => "ping",
            ServerRequest::CreateMessage(_) => "sampling/createMessage",
        }
    }
}

/// Notifications sent from the server to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ServerNotification {
    /// The server abandoned a request it sent to the client, usually because
    /// it timed out.
    #[serde(rename = "notifications/cancelled")]
    Cancelled {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "notifications/progress")]
    Progress {
        /// The progress token which was given in the initial request.
        #[serde(rename = "progressToken")]
        progress_token: ProgressToken,
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "notifications/message")]
    LoggingMessage {
        level: LoggingLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        logger: Option<String>,
        data: Value,
    },
}
