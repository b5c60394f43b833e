use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    api::ClientAPI,
    dispatcher::Dispatcher,
    error::{Error, Result},
    request_handler::{RequestHandler, RequestMethod},
    schema::{
        CreateMessageParams, CreateMessageResult, EmptyResult, LoggingLevel, ProgressToken,
        RequestId, ResourceContents, ServerNotification, ServerRequest,
    },
};

/// Upper bound on the completion length asked for by [`ServerCtx::sample`].
const SAMPLE_MAX_TOKENS: i64 = 1000;

/// Context handed to capability handlers for the duration of one invocation.
///
/// Through it a handler reports progress, emits log records, and calls back
/// into the client's language model. Clones share the connection they were
/// created for.
#[derive(Clone)]
pub struct ServerCtx {
    requests: RequestHandler,
    dispatcher: Dispatcher,
    /// Minimum level forwarded to the client, set by `logging/setLevel`.
    log_level: Arc<RwLock<LoggingLevel>>,
    /// Cancelled when the connection closes or the request is cancelled.
    shutdown: CancellationToken,
    sampling_timeout: Duration,
    request_id: Option<RequestId>,
    progress_token: Option<ProgressToken>,
    last_progress: Arc<Mutex<Option<u64>>>,
    logger: Option<String>,
}

impl ServerCtx {
    pub(crate) fn new(
        requests: RequestHandler,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
        sampling_timeout: Duration,
    ) -> Self {
        Self {
            requests,
            dispatcher,
            log_level: Arc::new(RwLock::new(LoggingLevel::Debug)),
            shutdown,
            sampling_timeout,
            request_id: None,
            progress_token: None,
            last_progress: Arc::new(Mutex::new(None)),
            logger: None,
        }
    }

    /// A context scoped to one incoming request.
    pub(crate) fn for_request(
        &self,
        request_id: RequestId,
        progress_token: Option<ProgressToken>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shutdown: cancel,
            request_id: Some(request_id),
            progress_token,
            last_progress: Arc::new(Mutex::new(None)),
            ..self.clone()
        }
    }

    /// The same context with log records attributed to `logger`.
    pub fn with_logger(&self, logger: impl Into<String>) -> Self {
        Self {
            logger: Some(logger.into()),
            ..self.clone()
        }
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Report `current` out of `total` units of work. Does nothing when the
    /// caller did not ask for progress. `current` may not decrease within one
    /// invocation and may not exceed `total`.
    pub fn report_progress(&self, current: u64, total: u64) -> Result<()> {
        let Some(token) = &self.progress_token else {
            return Ok(());
        };
        if current > total {
            return Err(Error::InvalidParams(format!(
                "progress {current} exceeds total {total}"
            )));
        }
        {
            let mut last = self
                .last_progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = *last {
                if current < previous {
                    return Err(Error::InvalidParams(format!(
                        "progress went backwards from {previous} to {current}"
                    )));
                }
            }
            *last = Some(current);
        }
        self.notify(ServerNotification::Progress {
            progress_token: token.clone(),
            progress: current as f64,
            total: Some(total as f64),
            message: None,
        })
    }

    /// Queue a notification for the client.
    pub fn notify(&self, notification: ServerNotification) -> Result<()> {
        self.requests.send_notification(&notification)
    }

    /// Emit a log record to the client. Records below the level set by the
    /// client are dropped; delivery failures are ignored.
    pub fn log(&self, level: LoggingLevel, data: impl Into<Value>) {
        let data = data.into();
        debug!(
            logger = self.logger.as_deref().unwrap_or("server"),
            "[{}] {}", level, data
        );
        if level < self.log_level() {
            return;
        }
        let notification = ServerNotification::LoggingMessage {
            level,
            logger: self.logger.clone(),
            data,
        };
        if let Err(e) = self.notify(notification) {
            debug!("Dropping log record: {}", e);
        }
    }

    pub fn debug(&self, data: impl Into<Value>) {
        self.log(LoggingLevel::Debug, data)
    }

    pub fn info(&self, data: impl Into<Value>) {
        self.log(LoggingLevel::Info, data)
    }

    pub fn warning(&self, data: impl Into<Value>) {
        self.log(LoggingLevel::Warning, data)
    }

    pub fn error(&self, data: impl Into<Value>) {
        self.log(LoggingLevel::Error, data)
    }

    pub fn log_level(&self) -> LoggingLevel {
        *self
            .log_level
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_log_level(&self, level: LoggingLevel) {
        *self
            .log_level
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = level;
    }

    /// Ask the client's language model to complete `prompt` and return the
    /// completion text.
    pub async fn sample(&self, prompt: impl Into<String>) -> Result<String> {
        let result = self
            .create_message(CreateMessageParams::from_prompt(prompt, SAMPLE_MAX_TOKENS))
            .await?;
        result
            .text()
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("sampling response carried no text".into()))
    }

    /// Send `sampling/createMessage` and wait for the answer, at most for the
    /// configured sampling timeout. On timeout the request is withdrawn and
    /// the client is told with `notifications/cancelled`.
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        let request = ServerRequest::CreateMessage(Box::new(params));
        let (id, rx) = self.requests.start(&request, None)?;

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.requests.abandon(&id);
                Err(Error::Cancelled("connection closed while waiting for sampling".into()))
            }
            outcome = tokio::time::timeout(
                self.sampling_timeout,
                self.requests.finish(request.method(), &id, rx),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    self.requests.abandon(&id);
                    warn!("Sampling request {} timed out after {:?}", id, self.sampling_timeout);
                    let cancelled = ServerNotification::Cancelled {
                        request_id: id.clone(),
                        reason: Some("sampling timed out".into()),
                    };
                    if let Err(e) = self.notify(cancelled) {
                        debug!("Could not withdraw sampling request: {}", e);
                    }
                    Err(Error::SamplingTimeout(self.sampling_timeout))
                }
            }
        }
    }

    /// Read a resource served by this same server.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let result = self.dispatcher.read_resource(self, uri).await?;
        Ok(result.contents)
    }
}

#[async_trait]
impl ClientAPI for ServerCtx {
    async fn ping(&self) -> Result<()> {
        let _: EmptyResult = self.requests.request(ServerRequest::Ping).await?;
        Ok(())
    }

    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        ServerCtx::create_message(self, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::CapabilityRegistry,
        schema::{JSONRPCMessage, JSONRPCResponse, JSONRpcResult, JSONRPC_VERSION},
        testutils::TestServerContext,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_progress_requires_token_and_order() {
        let mut harness = TestServerContext::with_registry(CapabilityRegistry::new());

        // Without a token nothing is sent.
        harness.ctx().report_progress(1, 3).unwrap();
        assert!(harness.try_recv().is_none());

        let ctx = harness.with_progress_token(ProgressToken::String("p1".into()));
        ctx.report_progress(0, 3).unwrap();
        ctx.report_progress(2, 3).unwrap();
        assert!(ctx.report_progress(1, 3).is_err());
        assert!(ctx.report_progress(4, 3).is_err());

        let first = harness.recv_notification().await;
        assert_eq!(first.notification.method, "notifications/progress");
        let params = first.notification.params.unwrap().other;
        assert_eq!(params.get("progressToken"), Some(&json!("p1")));
        assert_eq!(params.get("progress"), Some(&json!(0.0)));
        assert_eq!(params.get("total"), Some(&json!(3.0)));
    }

    #[tokio::test]
    async fn test_log_level_filters_records() {
        let mut harness = TestServerContext::with_registry(CapabilityRegistry::new());
        let ctx = harness.ctx().with_logger("echo");
        ctx.set_log_level(LoggingLevel::Warning);
        ctx.info("quiet");
        ctx.error("loud");

        let record = harness.recv_notification().await;
        let params = record.notification.params.unwrap().other;
        assert_eq!(params.get("level"), Some(&json!("error")));
        assert_eq!(params.get("logger"), Some(&json!("echo")));
        assert_eq!(params.get("data"), Some(&json!("loud")));
        assert!(harness.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_sampling_round_trip() {
        let mut harness = TestServerContext::with_registry(CapabilityRegistry::new());
        let ctx = harness.ctx().clone();
        let pending = tokio::spawn(async move { ctx.sample("How do you feel?").await });

        let request = match harness.recv().await {
            JSONRPCMessage::Request(request) => request,
            other => panic!("expected sampling request, got {other:?}"),
        };
        assert_eq!(request.request.method, "sampling/createMessage");

        let result = CreateMessageResult::assistant_text("test-model", "positive");
        let Value::Object(other) = serde_json::to_value(result).unwrap() else {
            panic!("result must be an object");
        };
        harness.respond(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            result: JSONRpcResult { other },
        });
        assert_eq!(pending.await.unwrap().unwrap(), "positive");
    }

    #[tokio::test]
    async fn test_sampling_timeout_withdraws_request() {
        let mut harness = TestServerContext::with_registry(CapabilityRegistry::new())
            .with_sampling_timeout(Duration::from_millis(20));
        let err = harness.ctx().sample("anyone there?").await.unwrap_err();
        assert!(matches!(err, Error::SamplingTimeout(d) if d == Duration::from_millis(20)));
        assert_eq!(harness.pending(), 0);

        assert!(matches!(harness.recv().await, JSONRPCMessage::Request(_)));
        let cancelled = harness.recv_notification().await;
        assert_eq!(cancelled.notification.method, "notifications/cancelled");
    }
}
