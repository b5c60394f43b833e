use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    api::ServerAPI,
    arguments::Arguments,
    config::SessionConfig,
    connection::ClientConn,
    error::{Error, Result},
    events::{LogRecord, ProgressEvent, SessionEvent},
    jsonrpc::{parse_notification, parse_request, result_to_jsonrpc_response},
    request_handler::RequestHandler,
    schema::*,
    transport::{GenericDuplex, StreamTransport, Transport, TransportStream},
};

const EVENT_CAPACITY: usize = 256;

/// MCP client session.
///
/// A client is opened once with [`Client::open`], used for a sequence of
/// calls, and released with [`Client::close`]. Calls on a client that is not
/// open fail fast with `ConnectionFailure`. At most one call is in flight at
/// a time.
pub struct Client<C: ClientConn = ()> {
    info: Implementation,
    config: SessionConfig,
    connection: Arc<C>,
    session: Mutex<Option<Session>>,
    open: Arc<AtomicBool>,
    in_flight: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    progress_slot: Arc<Mutex<Option<ProgressToken>>>,
    next_progress_token: AtomicU64,
}

struct Session {
    requests: RequestHandler,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    server: Option<InitializeResult>,
    /// Whether `on_connect` ran, and so `on_disconnect` is owed.
    announced: bool,
}

impl Client<()> {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new_with_connection(name, version, ())
    }
}

impl<C: ClientConn> Client<C> {
    /// Create a client whose server-facing hooks are handled by `connection`
    pub fn new_with_connection(
        name: impl Into<String>,
        version: impl Into<String>,
        connection: C,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            info: Implementation::new(name, version),
            config: SessionConfig::default(),
            connection: Arc::new(connection),
            session: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            in_flight: tokio::sync::Mutex::new(()),
            events,
            progress_slot: Arc::new(Mutex::new(None)),
            next_progress_token: AtomicU64::new(1),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The server's answer to `initialize`, once open.
    pub fn server_info(&self) -> Option<InitializeResult> {
        lock(&self.session).as_ref().and_then(|s| s.server.clone())
    }

    /// Progress and log events of this session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Connect `transport` and perform the initialize handshake. Any failure,
    /// including running past the connect timeout, leaves the client closed
    /// and is reported as `ConnectionFailure`.
    pub async fn open(&self, transport: Box<dyn Transport>) -> Result<InitializeResult> {
        if self.is_open() || lock(&self.session).is_some() {
            return Err(Error::ConnectionFailure(
                "session is already attached; close it first".into(),
            ));
        }
        let timeout = self.config.connect_timeout;
        let outcome = match tokio::time::timeout(timeout, self.establish(transport)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionFailure(format!(
                "handshake did not complete within {timeout:?}"
            ))),
        };
        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Failed to open session: {}", e);
                self.release().await;
                Err(e.into_connection_failure())
            }
        }
    }

    /// Open a session over generic AsyncRead and AsyncWrite streams
    pub async fn connect_stream<R, W>(&self, reader: R, writer: W) -> Result<InitializeResult>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        self.open(Box::new(StreamTransport::new(duplex))).await
    }

    async fn establish(&self, mut transport: Box<dyn Transport>) -> Result<InitializeResult> {
        transport.connect().await?;
        let stream = transport.framed()?;
        let (mut sink, stream) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();
        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogRecord>();
        let requests = RequestHandler::new(outbound, "client-req");
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        message = outbound_rx.recv() => match message {
                            Some(message) => {
                                if let Err(e) = sink.send(message).await {
                                    error!("Error sending message to server: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                if let Err(e) = sink.close().await {
                    debug!("Error closing transport: {}", e);
                }
            }
        });

        let reader = tokio::spawn(
            Reader {
                requests: requests.clone(),
                connection: self.connection.clone(),
                events: self.events.clone(),
                progress_slot: self.progress_slot.clone(),
                open: self.open.clone(),
                logs: log_tx,
                shutdown: shutdown.clone(),
                server_requests: Arc::new(DashMap::new()),
            }
            .run(stream),
        );

        let logs = tokio::spawn({
            let connection = self.connection.clone();
            async move {
                while let Some(record) = log_rx.recv().await {
                    connection.on_log(record).await;
                }
            }
        });

        *lock(&self.session) = Some(Session {
            requests: requests.clone(),
            shutdown,
            tasks: vec![writer, reader, logs],
            server: None,
            announced: false,
        });

        let result: InitializeResult = requests
            .request(ClientRequest::Initialize {
                protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                capabilities: ClientCapabilities::new().with_sampling(),
                client_info: self.info.clone(),
            })
            .await?;
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(Error::Protocol(format!(
                "server chose unsupported protocol version {}",
                result.protocol_version
            )));
        }
        requests.send_notification(&ClientNotification::Initialized)?;
        self.connection.on_connect(&result.server_info).await?;

        if let Some(session) = lock(&self.session).as_mut() {
            session.server = Some(result.clone());
            session.announced = true;
        }
        self.open.store(true, Ordering::SeqCst);
        info!(
            "Connected to {} {} (protocol {})",
            result.server_info.name, result.server_info.version, result.protocol_version
        );
        Ok(result)
    }

    /// Close the session. Outstanding calls resolve with `Cancelled` and the
    /// transport is released. Closing a closed client does nothing.
    pub async fn close(&self) -> Result<()> {
        if self.release().await {
            info!("Session closed");
            self.connection.on_disconnect().await?;
        }
        Ok(())
    }

    /// Tear down the session, returning whether the connection hook saw it
    /// open.
    async fn release(&self) -> bool {
        self.open.store(false, Ordering::SeqCst);
        let Some(session) = lock(&self.session).take() else {
            return false;
        };
        let announced = session.announced;
        session
            .requests
            .cancel_all(Error::Cancelled("session closed".into()));
        session.shutdown.cancel();

        let aborts: Vec<AbortHandle> = session.tasks.iter().map(JoinHandle::abort_handle).collect();
        let grace = self.config.close_grace;
        if tokio::time::timeout(grace, futures::future::join_all(session.tasks))
            .await
            .is_err()
        {
            warn!("Session tasks still running after {:?}, aborting", grace);
            for abort in aborts {
                abort.abort();
            }
        }
        announced
    }

    fn requests(&self) -> Result<RequestHandler> {
        if !self.is_open() {
            return Err(Error::ConnectionFailure("session is not open".into()));
        }
        lock(&self.session)
            .as_ref()
            .map(|s| s.requests.clone())
            .ok_or_else(|| Error::ConnectionFailure("session is not open".into()))
    }

    async fn request<T>(&self, request: ClientRequest) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let _slot = self.in_flight.lock().await;
        self.requests()?.request(request).await
    }
}

impl<C: ClientConn> Drop for Client<C> {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(session) = session {
            session
                .requests
                .cancel_all(Error::Cancelled("client dropped".into()));
            session.shutdown.cancel();
            for task in session.tasks {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl<C: ClientConn> ServerAPI for Client<C> {
    async fn ping(&self) -> Result<()> {
        let _: EmptyResult = self.request(ClientRequest::Ping).await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<ListToolsResult> {
        self.request(ClientRequest::ListTools).await
    }

    async fn list_resources(&self) -> Result<ListResourcesResult> {
        self.request(ClientRequest::ListResources).await
    }

    async fn list_resource_templates(&self) -> Result<ListResourceTemplatesResult> {
        self.request(ClientRequest::ListResourceTemplates).await
    }

    async fn list_prompts(&self) -> Result<ListPromptsResult> {
        self.request(ClientRequest::ListPrompts).await
    }

    async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<CallToolResult> {
        let _slot = self.in_flight.lock().await;
        let requests = self.requests()?;
        let token = ProgressToken::String(format!(
            "progress-{}",
            self.next_progress_token.fetch_add(1, Ordering::Relaxed)
        ));
        let _progress = ProgressSlot::claim(&self.progress_slot, token.clone());
        requests
            .request_with_meta(
                ClientRequest::CallTool {
                    name: name.to_string(),
                    arguments: Some(arguments),
                },
                Some(RequestMeta {
                    progress_token: Some(token),
                }),
            )
            .await
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.request(ClientRequest::ReadResource {
            uri: uri.to_string(),
        })
        .await
    }

    async fn get_prompt(&self, name: &str, arguments: Arguments) -> Result<GetPromptResult> {
        self.request(ClientRequest::GetPrompt {
            name: name.to_string(),
            arguments: (!arguments.is_empty()).then_some(arguments),
        })
        .await
    }

    async fn set_level(&self, level: LoggingLevel) -> Result<()> {
        let _: EmptyResult = self.request(ClientRequest::SetLevel { level }).await?;
        Ok(())
    }
}

/// Marks the progress token of the call in flight; only its progress
/// notifications are published.
struct ProgressSlot<'a> {
    slot: &'a Mutex<Option<ProgressToken>>,
}

impl<'a> ProgressSlot<'a> {
    fn claim(slot: &'a Mutex<Option<ProgressToken>>, token: ProgressToken) -> Self {
        *lock(slot) = Some(token);
        Self { slot }
    }
}

impl Drop for ProgressSlot<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

/// Incoming half of a session.
struct Reader<C: ClientConn> {
    requests: RequestHandler,
    connection: Arc<C>,
    events: broadcast::Sender<SessionEvent>,
    progress_slot: Arc<Mutex<Option<ProgressToken>>>,
    open: Arc<AtomicBool>,
    logs: mpsc::UnboundedSender<LogRecord>,
    shutdown: CancellationToken,
    /// Server requests being answered, so the server can withdraw them.
    server_requests: Arc<DashMap<RequestId, AbortHandle>>,
}

impl<C: ClientConn> Reader<C> {
    async fn run(self, mut stream: SplitStream<Box<dyn TransportStream>>) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(JSONRPCMessage::Response(response))) => {
                    self.requests.handle_response(response)
                }
                Some(Ok(JSONRPCMessage::Error(error))) => self.requests.handle_error(error),
                Some(Ok(JSONRPCMessage::Notification(notification))) => {
                    self.handle_notification(notification)
                }
                Some(Ok(JSONRPCMessage::Request(request))) => self.handle_request(request),
                Some(Err(e)) => {
                    error!("Error reading message: {}", e);
                    break;
                }
                None => {
                    info!("Server closed the connection");
                    break;
                }
            }
        }

        self.open.store(false, Ordering::SeqCst);
        self.requests
            .cancel_all(Error::ConnectionFailure("connection closed".into()));
        for entry in self.server_requests.iter() {
            entry.value().abort();
        }
    }

    fn handle_notification(&self, notification: JSONRPCNotification) {
        match parse_notification::<ServerNotification>(notification) {
            Ok(ServerNotification::Progress {
                progress_token,
                progress,
                total,
                message,
            }) => {
                let current = lock(&self.progress_slot).clone();
                if current.as_ref() == Some(&progress_token) {
                    let _ = self.events.send(SessionEvent::Progress(ProgressEvent {
                        current: progress,
                        total,
                        message,
                    }));
                } else {
                    debug!("Dropping progress for stale token {:?}", progress_token);
                }
            }
            Ok(ServerNotification::LoggingMessage {
                level,
                logger,
                data,
            }) => {
                let record = LogRecord {
                    level,
                    logger,
                    data,
                };
                let _ = self.events.send(SessionEvent::Log(record.clone()));
                if self.logs.send(record).is_err() {
                    debug!("Log hook is gone, dropping record");
                }
            }
            Ok(ServerNotification::Cancelled { request_id, reason }) => {
                info!(
                    "Server withdrew request {}: {}",
                    request_id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                if let Some((_, task)) = self.server_requests.remove(&request_id) {
                    task.abort();
                }
            }
            Err(e) => warn!("Failed to deserialize server notification: {}", e),
        }
    }

    /// Answer a server request on its own task so that notifications keep
    /// flowing while, for instance, a sampling request is being worked on.
    fn handle_request(&self, request: JSONRPCRequest) {
        let id = request.id.clone();
        debug!("Client handling server request: {} method: {}", id, request.request.method);
        let parsed = parse_request::<ServerRequest>(&request.request);
        let connection = self.connection.clone();
        let requests = self.requests.clone();
        let server_requests = self.server_requests.clone();

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let response = match parsed {
                Ok(ServerRequest::Ping) => {
                    result_to_jsonrpc_response(id.clone(), connection.pong().await.map(|_| json!({})))
                }
                Ok(ServerRequest::CreateMessage(params)) => {
                    result_to_jsonrpc_response(id.clone(), connection.create_message(*params).await)
                }
                Err(e) => JSONRPCMessage::Error(e.to_jsonrpc_error(id.clone())),
            };
            server_requests.remove(&id);
            if let Err(e) = requests.send_message(response) {
                debug!("Could not answer server request {}: {}", id, e);
            }
        });
        self.server_requests.insert(task_id.clone(), task.abort_handle());
        if task.is_finished() {
            self.server_requests.remove(&task_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_fail_fast_when_closed() {
        let client = Client::new("test-client", "1.0.0");
        assert!(!client.is_open());
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure(_)));
        // Closing a client that never opened is a no-op.
        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_against_silent_peer_times_out() {
        let (_server_reader, client_writer) = tokio::io::duplex(1024);
        let (client_reader, _server_writer) = tokio::io::duplex(1024);
        let client = Client::new("test-client", "1.0.0").with_config(
            SessionConfig::default().with_connect_timeout(std::time::Duration::from_millis(50)),
        );
        let err = client
            .connect_stream(client_reader, client_writer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure(_)));
        assert!(!client.is_open());
        assert!(client.server_info().is_none());
    }
}
