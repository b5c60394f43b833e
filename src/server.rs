use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::ServerConfig,
    context::ServerCtx,
    dispatcher::Dispatcher,
    error::{Error, Result},
    jsonrpc::{parse_notification, parse_request, result_to_jsonrpc_response},
    registry::CapabilityRegistry,
    request_handler::{Outbound, RequestHandler},
    schema::*,
    transport::{GenericDuplex, StdioTransport, StreamTransport, Transport},
};

/// MCP server exposing the capabilities of one registry. Cheap to clone;
/// every connection shares the same registry.
#[derive(Clone)]
pub struct Server {
    info: Implementation,
    instructions: Option<String>,
    registry: Arc<CapabilityRegistry>,
    config: ServerConfig,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        registry: CapabilityRegistry,
    ) -> Self {
        Self {
            info: Implementation::new(name, version),
            instructions: None,
            registry: Arc::new(registry),
            config: ServerConfig::default(),
        }
    }

    /// Usage notes returned to clients in the initialize result
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Capabilities advertised during initialization, derived from what the
    /// registry holds.
    pub fn capabilities(&self) -> ServerCapabilities {
        let mut capabilities = ServerCapabilities::default().with_logging();
        if self.registry.has_tools() {
            capabilities = capabilities.with_tools();
        }
        if self.registry.has_resources() {
            capabilities = capabilities.with_resources();
        }
        if self.registry.has_prompts() {
            capabilities = capabilities.with_prompts();
        }
        capabilities
    }

    /// Serve a single connection using the provided transport
    pub async fn serve(self, transport: Box<dyn Transport>) -> Result<()> {
        let handle = ServerHandle::new(self, transport).await?;
        handle
            .handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))
    }

    /// Serve connections from stdin/stdout
    pub async fn serve_stdio(self) -> Result<()> {
        self.serve(Box::new(StdioTransport::new())).await
    }

    /// Serve using generic AsyncRead and AsyncWrite streams
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        self.serve(Box::new(StreamTransport::new(duplex))).await
    }

    /// Serve TCP connections by accepting them in a loop
    pub async fn serve_tcp(self, addr: impl tokio::net::ToSocketAddrs) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("MCP server listening on {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("New connection from {}", peer_addr);
                    let server = self.clone();
                    tokio::spawn(async move {
                        let transport = Box::new(StreamTransport::new(stream));
                        match server.serve(transport).await {
                            Ok(()) => info!("Connection from {} closed", peer_addr),
                            Err(e) => error!("Error handling connection from {}: {}", peer_addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

pub struct ServerHandle {
    pub handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
}

impl ServerHandle {
    /// Start serving one connection on `transport`, returning a handle for
    /// stopping it.
    pub async fn new(server: Server, mut transport: Box<dyn Transport>) -> Result<Self> {
        transport.connect().await?;
        let stream = transport.framed()?;
        let (mut sink, mut stream) = stream.split();
        info!("MCP server started");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();
        let shutdown_token = CancellationToken::new();
        let requests = RequestHandler::new(outbound.clone(), "srv-req");
        let ctx = ServerCtx::new(
            requests.clone(),
            Dispatcher::new(server.registry.clone()),
            shutdown_token.clone(),
            server.config.sampling_timeout,
        );
        let mut connection = Connection {
            server,
            ctx,
            requests,
            outbound,
            initialized: false,
            in_flight: Arc::new(DashMap::new()),
            tasks: JoinSet::new(),
        };

        let token = shutdown_token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Server received shutdown signal");
                        break;
                    }
                    incoming = stream.next() => match incoming {
                        Some(Ok(message)) => connection.handle_message(message),
                        Some(Err(e)) => {
                            error!("Error reading message: {}", e);
                            break;
                        }
                        None => {
                            info!("Client disconnected");
                            break;
                        }
                    },
                    Some(message) = outbound_rx.recv() => {
                        if let Err(e) = sink.send(message).await {
                            error!("Error sending message to client: {}", e);
                            break;
                        }
                    }
                    Some(joined) = connection.tasks.join_next(), if !connection.tasks.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!("Request task panicked: {}", e);
                            }
                        }
                    }
                }
            }

            connection.shutdown().await;
            if let Err(e) = sink.close().await {
                debug!("Error closing transport: {}", e);
            }
            info!("MCP server stopped");
        });

        Ok(ServerHandle {
            handle,
            shutdown_token,
        })
    }

    /// Serve one connection over generic AsyncRead and AsyncWrite streams
    pub async fn from_stream<R, W>(server: Server, reader: R, writer: W) -> Result<Self>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        Self::new(server, Box::new(StreamTransport::new(duplex))).await
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown_token.cancel();
        self.handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))
    }
}

/// State of one server connection, owned by its loop task.
struct Connection {
    server: Server,
    ctx: ServerCtx,
    requests: RequestHandler,
    outbound: Outbound,
    initialized: bool,
    in_flight: Arc<DashMap<RequestId, CancellationToken>>,
    tasks: JoinSet<()>,
}

impl Connection {
    fn handle_message(&mut self, message: JSONRPCMessage) {
        match message {
            JSONRPCMessage::Request(request) => self.handle_request(request),
            JSONRPCMessage::Notification(notification) => self.handle_notification(notification),
            JSONRPCMessage::Response(response) => {
                debug!("Server received response from client: {}", response.id);
                self.requests.handle_response(response);
            }
            JSONRPCMessage::Error(error) => {
                debug!("Server received error from client: {}", error.id);
                self.requests.handle_error(error);
            }
        }
    }

    fn send(&self, message: JSONRPCMessage) {
        if self.outbound.send(message).is_err() {
            error!("Outbound queue closed");
        }
    }

    fn handle_request(&mut self, request: JSONRPCRequest) {
        let id = request.id.clone();
        let method = request.request.method.clone();
        debug!("Server handling request: {} method: {}", id, method);

        if method == "initialize" {
            let response = self.initialize(&request);
            self.send(response);
            return;
        }
        if !self.initialized && method != "ping" {
            warn!("Rejecting '{}' before initialization", method);
            let error = Error::Protocol(format!("'{method}' sent before initialize"));
            self.send(JSONRPCMessage::Error(error.to_jsonrpc_error(id)));
            return;
        }

        let client_request: ClientRequest = match parse_request(&request.request) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.send(JSONRPCMessage::Error(e.to_jsonrpc_error(id)));
                return;
            }
        };
        let progress_token = request
            .request
            .params
            .as_ref()
            .and_then(|p| p.meta.as_ref())
            .and_then(|m| m.progress_token.clone());

        let cancel = self.ctx.cancellation().child_token();
        self.in_flight.insert(id.clone(), cancel.clone());
        let ctx = self.ctx.for_request(id.clone(), progress_token, cancel.clone());
        let in_flight = self.in_flight.clone();
        let outbound = self.outbound.clone();

        self.tasks.spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = dispatch(&ctx, client_request) => Some(result),
            };
            in_flight.remove(&id);
            match outcome {
                Some(result) => {
                    if outbound.send(result_to_jsonrpc_response(id, result)).is_err() {
                        debug!("Connection closed before response could be queued");
                    }
                }
                None => debug!("Request {} cancelled, no response sent", id),
            }
        });
    }

    fn initialize(&mut self, request: &JSONRPCRequest) -> JSONRPCMessage {
        let result = match parse_request::<ClientRequest>(&request.request) {
            Ok(_) if self.initialized => {
                Err(Error::Protocol("session is already initialized".into()))
            }
            Ok(ClientRequest::Initialize {
                protocol_version,
                client_info,
                ..
            }) => {
                let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&protocol_version.as_str()) {
                    protocol_version
                } else {
                    warn!(
                        "Client requested unsupported protocol {}, offering {}",
                        protocol_version, LATEST_PROTOCOL_VERSION
                    );
                    LATEST_PROTOCOL_VERSION.to_string()
                };
                info!(
                    "Initializing session with {} {} (protocol {})",
                    client_info.name, client_info.version, version
                );
                self.initialized = true;
                Ok(InitializeResult::new(self.server.info.clone())
                    .with_protocol_version(version)
                    .with_capabilities(self.server.capabilities())
                    .with_instructions(self.server.instructions.clone()))
            }
            Ok(_) => Err(Error::Protocol("malformed initialize request".into())),
            Err(e) => Err(e),
        };
        result_to_jsonrpc_response(request.id.clone(), result)
    }

    fn handle_notification(&mut self, notification: JSONRPCNotification) {
        debug!("Received notification: {}", notification.notification.method);
        match parse_notification::<ClientNotification>(notification) {
            Ok(ClientNotification::Initialized) => debug!("Client finished initialization"),
            Ok(ClientNotification::Cancelled { request_id, reason }) => {
                match self.in_flight.remove(&request_id) {
                    Some((_, token)) => {
                        info!(
                            "Client cancelled request {}: {}",
                            request_id,
                            reason.as_deref().unwrap_or("no reason given")
                        );
                        token.cancel();
                    }
                    None => debug!("Cancellation for unknown request {}", request_id),
                }
            }
            Err(e) => warn!("Failed to deserialize client notification: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        self.ctx.cancellation().cancel();
        self.requests
            .cancel_all(Error::Cancelled("connection closed".into()));
        self.tasks.shutdown().await;
    }
}

/// Execute one client request against the connection's dispatcher.
async fn dispatch(ctx: &ServerCtx, request: ClientRequest) -> Result<Value> {
    let dispatcher = ctx.dispatcher();
    let registry = dispatcher.registry();
    match request {
        ClientRequest::Ping => Ok(json!({})),
        ClientRequest::Initialize { .. } => {
            Err(Error::Protocol("initialize is handled by the connection".into()))
        }
        ClientRequest::SetLevel { level } => {
            info!("Client set log level to {}", level);
            ctx.set_log_level(level);
            Ok(json!({}))
        }
        ClientRequest::ListTools => {
            to_value(ListToolsResult::default().with_tools(registry.list_tools()))
        }
        ClientRequest::ListResources => to_value(ListResourcesResult {
            resources: registry.list_resources(),
        }),
        ClientRequest::ListResourceTemplates => to_value(ListResourceTemplatesResult {
            resource_templates: registry.list_resource_templates(),
        }),
        ClientRequest::ListPrompts => to_value(ListPromptsResult {
            prompts: registry.list_prompts(),
        }),
        ClientRequest::CallTool { name, arguments } => {
            let value = dispatcher
                .call_tool(ctx, &name, arguments.unwrap_or_default())
                .await?;
            to_value(CallToolResult::from_value(value))
        }
        ClientRequest::ReadResource { uri } => to_value(dispatcher.read_resource(ctx, &uri).await?),
        ClientRequest::GetPrompt { name, arguments } => {
            to_value(dispatcher.get_prompt(&name, arguments.unwrap_or_default())?)
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arguments::Arguments,
        registry::ToolDescriptor,
        testutils::{read_message, send_message},
    };
    use tokio::io::BufReader;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with_tool(ToolDescriptor::new(
                "echo",
                ToolInputSchema::default(),
                |_ctx: ServerCtx, args: Arguments| async move {
                    Ok(json!(args.get_string("message").unwrap_or_default()))
                },
            ))
            .unwrap()
    }

    fn request(id: i64, method: &str, params: Value) -> JSONRPCMessage {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    #[test]
    fn test_capabilities_follow_registry() {
        let server = Server::new("test", "0.1.0", registry());
        let capabilities = server.capabilities();
        assert!(capabilities.tools.is_some());
        assert!(capabilities.logging.is_some());
        assert!(capabilities.prompts.is_none());
        assert!(capabilities.resources.is_none());
        assert_eq!(
            serde_json::to_value(&capabilities).unwrap(),
            json!({"logging": {}, "tools": {}})
        );
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() {
        let (server_reader, client_writer) = tokio::io::duplex(8 * 1024);
        let (client_reader, server_writer) = tokio::io::duplex(8 * 1024);
        let server = Server::new("test", "0.1.0", registry());
        let handle = ServerHandle::from_stream(server, server_reader, server_writer)
            .await
            .unwrap();
        let mut writer = client_writer;
        let mut reader = BufReader::new(client_reader);

        send_message(&mut writer, &request(1, "tools/list", json!({})))
            .await
            .unwrap();
        match read_message(&mut reader).await.unwrap() {
            JSONRPCMessage::Error(e) => assert_eq!(e.error.code, INVALID_REQUEST),
            other => panic!("expected error, got {other:?}"),
        }

        // Ping is always allowed.
        send_message(&mut writer, &request(2, "ping", json!({})))
            .await
            .unwrap();
        assert!(matches!(
            read_message(&mut reader).await.unwrap(),
            JSONRPCMessage::Response(_)
        ));

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let (server_reader, client_writer) = tokio::io::duplex(8 * 1024);
        let (client_reader, server_writer) = tokio::io::duplex(8 * 1024);
        let server = Server::new("test", "0.1.0", registry()).with_instructions("be nice");
        let handle = ServerHandle::from_stream(server, server_reader, server_writer)
            .await
            .unwrap();
        let mut writer = client_writer;
        let mut reader = BufReader::new(client_reader);

        let init = request(
            1,
            "initialize",
            json!({
                "protocolVersion": "1999-01-01",
                "capabilities": {},
                "clientInfo": {"name": "raw", "version": "0"}
            }),
        );
        send_message(&mut writer, &init).await.unwrap();
        let JSONRPCMessage::Response(response) = read_message(&mut reader).await.unwrap() else {
            panic!("expected initialize response");
        };
        assert_eq!(
            response.result.other.get("protocolVersion"),
            Some(&json!(LATEST_PROTOCOL_VERSION))
        );
        assert_eq!(
            response.result.other.get("instructions"),
            Some(&json!("be nice"))
        );

        send_message(
            &mut writer,
            &request(2, "tools/destroy", json!({})),
        )
        .await
        .unwrap();
        match read_message(&mut reader).await.unwrap() {
            JSONRPCMessage::Error(e) => assert_eq!(e.error.code, METHOD_NOT_FOUND),
            other => panic!("expected error, got {other:?}"),
        }

        handle.stop().await.unwrap();
    }
}
