use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PREVIOUS_PROTOCOL_VERSION: &str = "2025-03-26";
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PREVIOUS_PROTOCOL_VERSION];
pub const JSONRPC_VERSION: &str = "2.0";

/// Any JSON-RPC object that can be decoded off the wire or encoded to be
/// sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

/// A progress token, used to associate progress notifications with the
/// original request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// A uniquely identifying ID for a request in JSON-RPC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    /// If specified, the caller is requesting out-of-band progress
    /// notifications for this request. The value is an opaque token attached
    /// to every subsequent `notifications/progress`.
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<NotificationParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationParams {
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JSONRpcResult {
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A request that expects a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(flatten)]
    pub request: Request,
}

/// A notification which does not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// A successful (non-error) response to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: JSONRpcResult,
}

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Implementation-defined server error codes
pub const HANDLER_ERROR: i32 = -32000;
pub const SAMPLING_TIMEOUT: i32 = -32001;
pub const RESOURCE_NOT_FOUND: i32 = -32002;
pub const REQUEST_CANCELLED: i32 = -32800;

/// A response to a request that indicates an error occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: ErrorObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type that occurred.
    pub code: i32,
    /// A short description of the error.
    pub message: String,
    /// Additional structured information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response that indicates success but carries no data.
pub type EmptyResult = JSONRpcResult;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_message_discrimination() {
        let request: JSONRPCMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(matches!(request, JSONRPCMessage::Request(_)));

        let notification: JSONRPCMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(matches!(notification, JSONRPCMessage::Notification(_)));

        let response: JSONRPCMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert!(matches!(response, JSONRPCMessage::Response(_)));

        let error: JSONRPCMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": "a", "error": {"code": -32601, "message": "nope"}}),
        )
        .unwrap();
        assert!(matches!(error, JSONRPCMessage::Error(_)));
    }

    #[test]
    fn test_progress_token_in_meta() {
        let params: RequestParams = serde_json::from_value(json!({
            "name": "process_items",
            "_meta": {"progressToken": 7}
        }))
        .unwrap();
        assert_eq!(
            params.meta.and_then(|m| m.progress_token),
            Some(ProgressToken::Number(7))
        );
        assert!(params.other.contains_key("name"));
        assert!(!params.other.contains_key("_meta"));
    }
}
