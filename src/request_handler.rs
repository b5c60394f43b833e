use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Error, Result},
    jsonrpc::{request_params, split_method, to_notification},
    schema::{
        JSONRPCError, JSONRPCMessage, JSONRPCRequest, JSONRPCResponse, Request, RequestId,
        RequestMeta, JSONRPC_VERSION,
    },
};

/// Everything written to one connection goes through a single queue, so
/// messages leave in exactly the order they were produced.
pub(crate) type Outbound = mpsc::UnboundedSender<JSONRPCMessage>;

/// How a pending request was resolved.
#[derive(Debug)]
pub(crate) enum ResponseOrError {
    Response(JSONRPCResponse),
    Error(JSONRPCError),
    /// Resolved locally without an answer from the peer.
    Aborted(Error),
}

/// Request/response correlation shared between the client session and the
/// server-side `ServerCtx`.
#[derive(Clone)]
pub(crate) struct RequestHandler {
    outbound: Outbound,
    pending_requests: Arc<DashMap<RequestId, oneshot::Sender<ResponseOrError>>>,
    next_request_id: Arc<AtomicU64>,
    /// Prefix for request IDs ("client-req" or "srv-req")
    id_prefix: &'static str,
}

impl RequestHandler {
    pub fn new(outbound: Outbound, id_prefix: &'static str) -> Self {
        Self {
            outbound,
            pending_requests: Arc::new(DashMap::new()),
            next_request_id: Arc::new(AtomicU64::new(1)),
            id_prefix,
        }
    }

    /// Send a request and wait for its response.
    pub async fn request<Req, Res>(&self, request: Req) -> Result<Res>
    where
        Req: Serialize + RequestMethod,
        Res: DeserializeOwned,
    {
        self.request_with_meta(request, None).await
    }

    pub async fn request_with_meta<Req, Res>(
        &self,
        request: Req,
        meta: Option<RequestMeta>,
    ) -> Result<Res>
    where
        Req: Serialize + RequestMethod,
        Res: DeserializeOwned,
    {
        let (id, rx) = self.start(&request, meta)?;
        self.finish(request.method(), &id, rx).await
    }

    /// Register a pending entry and put the request on the wire. The caller
    /// owns the returned receiver and must either `finish` or `abandon` it.
    pub fn start<Req>(
        &self,
        request: &Req,
        meta: Option<RequestMeta>,
    ) -> Result<(RequestId, oneshot::Receiver<ResponseOrError>)>
    where
        Req: Serialize + RequestMethod,
    {
        let (method, params) = split_method(request)?;
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(id.clone(), tx);
        tracing::debug!(
            "Stored pending request with ID: {}, total pending: {}",
            id,
            self.pending_requests.len()
        );

        let message = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            request: Request {
                method,
                params: request_params(params, meta),
            },
        });
        tracing::debug!("Sending request with ID: {} method: {}", id, request.method());
        if let Err(e) = self.send_message(message) {
            self.pending_requests.remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Wait for the answer to a request registered with `start`.
    pub async fn finish<Res>(
        &self,
        method: &str,
        id: &RequestId,
        rx: oneshot::Receiver<ResponseOrError>,
    ) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        match rx.await {
            Ok(ResponseOrError::Response(response)) => {
                serde_json::from_value(Value::Object(response.result.other)).map_err(|e| {
                    Error::Protocol(format!("Failed to deserialize {method} response: {e}"))
                })
            }
            Ok(ResponseOrError::Error(error)) => {
                Err(Error::from_error_object(method, error.error))
            }
            Ok(ResponseOrError::Aborted(error)) => Err(error),
            Err(_) => {
                self.pending_requests.remove(id);
                Err(Error::Cancelled(format!(
                    "response channel for request {id} closed"
                )))
            }
        }
    }

    /// Queue a message for the connection's writer.
    pub fn send_message(&self, message: JSONRPCMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::ConnectionFailure("connection is closed".into()))
    }

    /// Queue a typed notification.
    pub fn send_notification<N: Serialize>(&self, notification: &N) -> Result<()> {
        let notification = to_notification(notification)?;
        self.send_message(JSONRPCMessage::Notification(notification))
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        RequestId::String(format!("{}-{}", self.id_prefix, id))
    }

    /// Handle a response from the remote side
    pub fn handle_response(&self, response: JSONRPCResponse) {
        if let Some((_, tx)) = self.pending_requests.remove(&response.id) {
            let _ = tx.send(ResponseOrError::Response(response));
        } else {
            tracing::warn!("Received response for unknown request ID: {}", response.id);
        }
    }

    /// Handle an error response from the remote side
    pub fn handle_error(&self, error: JSONRPCError) {
        if let Some((_, tx)) = self.pending_requests.remove(&error.id) {
            let _ = tx.send(ResponseOrError::Error(error));
        } else {
            tracing::warn!("Received error for unknown request ID: {}", error.id);
        }
    }

    /// Forget a pending request; a late answer will be ignored.
    pub fn abandon(&self, id: &RequestId) -> bool {
        self.pending_requests.remove(id).is_some()
    }

    /// Resolve every pending request with `error`.
    pub fn cancel_all(&self, error: Error) {
        let ids: Vec<RequestId> = self
            .pending_requests
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, tx)) = self.pending_requests.remove(&id) {
                let _ = tx.send(ResponseOrError::Aborted(error.clone()));
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending_requests.len()
    }
}

/// Trait for types that can provide a method name for requests
pub(crate) trait RequestMethod {
    fn method(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClientRequest, EmptyResult, JSONRpcResult};

    #[tokio::test]
    async fn test_response_resolves_pending_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = RequestHandler::new(tx, "test");

        let requester = handler.clone();
        let pending = tokio::spawn(async move {
            let _: EmptyResult = requester.request(ClientRequest::Ping).await?;
            Ok::<_, Error>(())
        });

        let Some(JSONRPCMessage::Request(request)) = rx.recv().await else {
            panic!("expected a request on the wire");
        };
        assert_eq!(request.request.method, "ping");
        assert!(request.request.params.is_none());

        handler.handle_response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            result: JSONRpcResult::default(),
        });
        pending.await.unwrap().unwrap();
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_with_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = RequestHandler::new(tx, "test");

        let requester = handler.clone();
        let pending = tokio::spawn(async move {
            requester
                .request::<_, EmptyResult>(ClientRequest::Ping)
                .await
        });
        while handler.pending() == 0 {
            tokio::task::yield_now().await;
        }

        handler.cancel_all(Error::Cancelled("closing".into()));
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(reason) if reason == "closing"));
    }

    #[tokio::test]
    async fn test_closed_outbound_fails_fast() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handler = RequestHandler::new(tx, "test");
        let err = handler
            .request::<_, EmptyResult>(ClientRequest::Ping)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure(_)));
        assert_eq!(handler.pending(), 0);
    }
}
