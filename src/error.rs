use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::schema::{
    ErrorObject, JSONRPCError, RequestId, HANDLER_ERROR, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR, REQUEST_CANCELLED,
    RESOURCE_NOT_FOUND, SAMPLING_TIMEOUT,
};

/// The three kinds of capability a server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Tool => f.write_str("tool"),
            CapabilityKind::Resource => f.write_str("resource"),
            CapabilityKind::Prompt => f.write_str("prompt"),
        }
    }
}

/// Errors raised by sessions, dispatch and capability handlers.
///
/// The type is `Clone` so that a single failure (for instance a closed
/// session) can be delivered to every pending request at once.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Unknown {kind}: {key}")]
    NotFound { kind: CapabilityKind, key: String },

    #[error("Invalid arguments for '{name}': {message}")]
    InvalidArgs { name: String, message: String },

    #[error("Handler '{name}' failed: {message}")]
    HandlerError { name: String, message: String },

    #[error("Sampling request unanswered after {0:?}")]
    SamplingTimeout(Duration),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Duplicate {kind} registration: {key}")]
    DuplicateRegistration { kind: CapabilityKind, key: String },

    #[error("Invalid URI template '{template}': {message}")]
    InvalidUriTemplate { template: String, message: String },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON serialization error: {0}")]
    Json(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl Error {
    pub fn not_found(kind: CapabilityKind, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn invalid_args(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidArgs {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn handler_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::HandlerError {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Convert an error escaping a capability handler into its dispatch
    /// boundary form. Argument, sampling and cancellation failures keep their
    /// identity; everything else becomes a `HandlerError` for `name`.
    pub fn into_dispatch_error(self, name: &str) -> Self {
        match self {
            e @ (Error::InvalidArgs { .. }
            | Error::HandlerError { .. }
            | Error::SamplingTimeout(_)
            | Error::Cancelled(_)) => e,
            other => Error::handler_error(name, other.to_string()),
        }
    }

    /// Collapse any failure while opening a session into `ConnectionFailure`.
    pub fn into_connection_failure(self) -> Self {
        match self {
            e @ Error::ConnectionFailure(_) => e,
            other => Error::ConnectionFailure(other.to_string()),
        }
    }

    /// The JSON-RPC error object sent over the wire for this error.
    pub fn to_error_object(&self) -> ErrorObject {
        let (code, data) = match self {
            Error::NotFound { kind, key } => {
                (RESOURCE_NOT_FOUND, Some(json!({ "kind": kind, "key": key })))
            }
            Error::InvalidArgs { name, message } => (
                INVALID_PARAMS,
                Some(json!({ "name": name, "message": message })),
            ),
            Error::HandlerError { name, message } => (
                HANDLER_ERROR,
                Some(json!({ "name": name, "message": message })),
            ),
            Error::SamplingTimeout(timeout) => (
                SAMPLING_TIMEOUT,
                Some(json!({ "timeoutMs": timeout.as_millis() as u64 })),
            ),
            Error::Cancelled(reason) => (REQUEST_CANCELLED, Some(json!({ "reason": reason }))),
            Error::MethodNotFound(_) => (METHOD_NOT_FOUND, None),
            Error::InvalidParams(_) => (INVALID_PARAMS, None),
            Error::InvalidMessageFormat { .. } | Error::Protocol(_) => (INVALID_REQUEST, None),
            _ => (INTERNAL_ERROR, None),
        };
        ErrorObject {
            code,
            message: self.to_string(),
            data,
        }
    }

    pub fn to_jsonrpc_error(&self, id: RequestId) -> JSONRPCError {
        JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: self.to_error_object(),
        }
    }

    /// Rebuild a typed error from a JSON-RPC error received in answer to
    /// `method`.
    pub fn from_error_object(method: &str, error: ErrorObject) -> Self {
        let data = error.data.unwrap_or(Value::Null);
        let field = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        match error.code {
            RESOURCE_NOT_FOUND => {
                let kind = data
                    .get("kind")
                    .cloned()
                    .and_then(|k| serde_json::from_value::<CapabilityKind>(k).ok());
                match (kind, field("key")) {
                    (Some(kind), Some(key)) => Error::NotFound { kind, key },
                    _ => Error::Protocol(format!("{method}: {}", error.message)),
                }
            }
            INVALID_PARAMS => match field("name") {
                Some(name) => Error::InvalidArgs {
                    name,
                    message: field("message").unwrap_or(error.message),
                },
                None => Error::InvalidParams(format!("{method}: {}", error.message)),
            },
            HANDLER_ERROR => Error::HandlerError {
                name: field("name").unwrap_or_else(|| method.to_string()),
                message: field("message").unwrap_or(error.message),
            },
            SAMPLING_TIMEOUT => {
                let millis = data.get("timeoutMs").and_then(Value::as_u64).unwrap_or(0);
                Error::SamplingTimeout(Duration::from_millis(millis))
            }
            REQUEST_CANCELLED => Error::Cancelled(field("reason").unwrap_or(error.message)),
            METHOD_NOT_FOUND => Error::MethodNotFound(error.message),
            INVALID_REQUEST | PARSE_ERROR => Error::Protocol(error.message),
            INTERNAL_ERROR => Error::InternalError(error.message),
            code => Error::Protocol(format!("JSON-RPC error {code}: {}", error.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_survives_the_wire() {
        let original = Error::not_found(CapabilityKind::Tool, "missing");
        let object = original.to_error_object();
        assert_eq!(object.code, RESOURCE_NOT_FOUND);

        match Error::from_error_object("tools/call", object) {
            Error::NotFound { kind, key } => {
                assert_eq!(kind, CapabilityKind::Tool);
                assert_eq!(key, "missing");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_codes_and_reconstruction() {
        let cases: [(Error, i32, fn(&Error) -> bool); 10] = [
            (
                Error::handler_error("echo", "boom"),
                HANDLER_ERROR,
                |e| matches!(e, Error::HandlerError { name, message } if name == "echo" && message == "boom"),
            ),
            (
                Error::SamplingTimeout(Duration::from_millis(100)),
                SAMPLING_TIMEOUT,
                |e| matches!(e, Error::SamplingTimeout(d) if *d == Duration::from_millis(100)),
            ),
            (
                Error::not_found(CapabilityKind::Tool, "missing"),
                RESOURCE_NOT_FOUND,
                |e| matches!(e, Error::NotFound { kind: CapabilityKind::Tool, key } if key == "missing"),
            ),
            (
                Error::Cancelled("session closed".into()),
                REQUEST_CANCELLED,
                |e| matches!(e, Error::Cancelled(r) if r == "session closed"),
            ),
            (
                Error::invalid_args("echo", "missing message"),
                INVALID_PARAMS,
                |e| matches!(e, Error::InvalidArgs { name, message } if name == "echo" && message == "missing message"),
            ),
            (
                Error::InvalidParams("bad cursor".into()),
                INVALID_PARAMS,
                |e| matches!(e, Error::InvalidParams(m) if m.contains("bad cursor")),
            ),
            (
                Error::MethodNotFound("sampling/createMessage".into()),
                METHOD_NOT_FOUND,
                |e| matches!(e, Error::MethodNotFound(m) if m.contains("sampling/createMessage")),
            ),
            (
                Error::Protocol("not initialized".into()),
                INVALID_REQUEST,
                |e| matches!(e, Error::Protocol(m) if m.contains("not initialized")),
            ),
            (
                Error::InvalidMessageFormat {
                    message: "missing id".into(),
                },
                INVALID_REQUEST,
                |e| matches!(e, Error::Protocol(m) if m.contains("missing id")),
            ),
            (
                Error::Io("disk gone".into()),
                INTERNAL_ERROR,
                |e| matches!(e, Error::InternalError(m) if m.contains("disk gone")),
            ),
        ];

        for (error, code, rebuilt) in cases {
            let object = error.to_error_object();
            assert_eq!(object.code, code, "wire code for {error:?}");
            let back = Error::from_error_object("tools/call", object);
            assert!(rebuilt(&back), "{error:?} came back as {back:?}");
        }
    }

    #[test]
    fn test_sampling_timeout_keeps_duration() {
        let object = Error::SamplingTimeout(Duration::from_millis(250)).to_error_object();
        assert!(matches!(
            Error::from_error_object("tools/call", object),
            Error::SamplingTimeout(d) if d == Duration::from_millis(250)
        ));
    }

    #[test]
    fn test_plain_invalid_params_without_name() {
        let object = ErrorObject {
            code: INVALID_PARAMS,
            message: "bad".into(),
            data: None,
        };
        assert!(matches!(
            Error::from_error_object("resources/read", object),
            Error::InvalidParams(m) if m == "resources/read: bad"
        ));
    }

    #[test]
    fn test_dispatch_error_wrapping() {
        let wrapped = Error::Io("disk gone".into()).into_dispatch_error("echo");
        assert!(matches!(wrapped, Error::HandlerError { ref name, .. } if name == "echo"));

        let kept = Error::Cancelled("closed".into()).into_dispatch_error("echo");
        assert!(matches!(kept, Error::Cancelled(_)));
    }
}
