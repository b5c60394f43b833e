use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Newline-delimited JSON-RPC codec.
pub(crate) struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonRpcCodec {
    type Error = Error;
    type Item = JSONRPCMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(n) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(n + 1);
            let mut json_bytes = &line[..n];
            if json_bytes.last() == Some(&b'\r') {
                json_bytes = &json_bytes[..json_bytes.len() - 1];
            }
            // Blank lines between messages are tolerated.
            if json_bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            debug!(
                "Decoding JSON-RPC message: {:?}",
                std::str::from_utf8(json_bytes)
            );

            let message: JSONRPCMessage = serde_json::from_slice(json_bytes).map_err(|e| {
                error!("Failed to parse JSON-RPC message: {}", e);
                match std::str::from_utf8(json_bytes) {
                    Ok(text) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (content: {text})"),
                    },
                    Err(_) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (non-UTF8 content)"),
                    },
                }
            })?;
            return Ok(Some(message));
        }
    }
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, item: JSONRPCMessage, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        debug!("Encoded JSON-RPC message: {:?}", std::str::from_utf8(&json));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JSONRPCRequest, Request, RequestId, JSONRPC_VERSION};

    #[test]
    fn test_encode_decode_request() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::String("test-1".to_string()),
            request: Request {
                method: "initialize".to_string(),
                params: None,
            },
        };
        codec
            .encode(JSONRPCMessage::Request(request), &mut buf)
            .unwrap();

        match codec.decode(&mut buf).unwrap().unwrap() {
            JSONRPCMessage::Request(req) => {
                assert_eq!(req.id, RequestId::String("test-1".to_string()));
                assert_eq!(req.request.method, "initialize");
            }
            _ => panic!("Expected request message"),
        }
    }

    #[test]
    fn test_blank_lines_do_not_stall_buffered_messages() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(
            &b"\n\r\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\r\n"[..],
        );
        let decoded = codec.decode(&mut buf).unwrap();
        assert!(matches!(decoded, Some(JSONRPCMessage::Notification(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_more() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\":\"2.0\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_invalid_message_format() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::InvalidMessageFormat { .. })
        ));
    }
}
