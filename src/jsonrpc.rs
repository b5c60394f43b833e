//! Conversions between typed protocol enums and JSON-RPC envelopes.
//!
//! Typed requests and notifications are internally tagged by `method`; on
//! the wire the method sits beside `params`, so the tag has to be split off
//! when sending and merged back when receiving.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    schema::*,
};

/// Serialize a method-tagged value into its method name and parameter map.
pub(crate) fn split_method<T: Serialize>(message: &T) -> Result<(String, Map<String, Value>)> {
    let Value::Object(mut object) = serde_json::to_value(message)? else {
        return Err(Error::InternalError(
            "method-tagged message did not serialize to an object".into(),
        ));
    };
    match object.remove("method") {
        Some(Value::String(method)) => Ok((method, object)),
        _ => Err(Error::InternalError(
            "method-tagged message has no method".into(),
        )),
    }
}

/// Rebuild a method-tagged value from a method name and its parameters.
pub(crate) fn merge_method<T: DeserializeOwned>(
    method: &str,
    params: Map<String, Value>,
) -> serde_json::Result<T> {
    let mut object = params;
    object.insert("method".to_string(), Value::String(method.to_string()));
    serde_json::from_value(Value::Object(object))
}

pub(crate) fn request_params(params: Map<String, Value>, meta: Option<RequestMeta>) -> Option<RequestParams> {
    if params.is_empty() && meta.is_none() {
        None
    } else {
        Some(RequestParams {
            meta,
            other: params,
        })
    }
}

/// Create a JSON-RPC notification from a typed notification
pub(crate) fn to_notification<T: Serialize>(notification: &T) -> Result<JSONRPCNotification> {
    let (method, params) = split_method(notification)?;
    Ok(JSONRPCNotification {
        jsonrpc: JSONRPC_VERSION.to_string(),
        notification: Notification {
            method,
            params: (!params.is_empty()).then_some(NotificationParams { other: params }),
        },
    })
}

/// Parse a JSON-RPC notification into a typed notification
pub(crate) fn parse_notification<T: DeserializeOwned>(
    notification: JSONRPCNotification,
) -> serde_json::Result<T> {
    let params = notification
        .notification
        .params
        .map(|p| p.other)
        .unwrap_or_default();
    merge_method(&notification.notification.method, params)
}

/// Parse the params of a JSON-RPC request into a typed request. Unknown
/// methods map to `MethodNotFound`, malformed params to `InvalidParams`.
pub(crate) fn parse_request<T: DeserializeOwned>(request: &Request) -> Result<T> {
    let params = request
        .params
        .as_ref()
        .map(|p| p.other.clone())
        .unwrap_or_default();
    merge_method(&request.method, params).map_err(|err| {
        if err.to_string().contains("unknown variant") {
            Error::MethodNotFound(request.method.clone())
        } else {
            Error::InvalidParams(format!(
                "Invalid parameters for {}: {err}",
                request.method
            ))
        }
    })
}

/// Convert a Result<T> to a JSON-RPC response
pub(crate) fn result_to_jsonrpc_response<T>(id: RequestId, result: Result<T>) -> JSONRPCMessage
where
    T: Serialize,
{
    let value = result.and_then(|v| serde_json::to_value(v).map_err(Error::from));
    match value {
        Ok(value) => {
            let other = match value {
                Value::Object(object) => object,
                Value::Null => Map::new(),
                other => {
                    let mut map = Map::new();
                    map.insert("result".to_string(), other);
                    map
                }
            };
            JSONRPCMessage::Response(JSONRPCResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result: JSONRpcResult { other },
            })
        }
        Err(e) => JSONRPCMessage::Error(e.to_jsonrpc_error(id)),
    }
}
