//! Test utilities for `research_mcp`.
//!
//! Helpers shared by the unit tests and the integration tests under
//! `tests/`: in-memory duplex streams, newline-delimited JSON-RPC framing by
//! hand, in-process client/server pairs, and a [`ServerCtx`] whose outbound
//! traffic can be inspected directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    context::ServerCtx,
    dispatcher::Dispatcher,
    error::{Error, Result},
    registry::CapabilityRegistry,
    request_handler::RequestHandler,
    schema::{JSONRPCMessage, JSONRPCNotification, JSONRPCResponse, ProgressToken, RequestId},
    Client, ClientConn, Server, ServerHandle,
};

/// How long the inspection helpers wait for a message before failing the
/// test.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Two in-memory pipes forming one bidirectional channel. The first pair is
/// the server's (`reader`, `writer`), the second the client's.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
) {
    let (server_reader, client_writer) = io::duplex(64 * 1024);
    let (client_reader, server_writer) = io::duplex(64 * 1024);
    (server_reader, server_writer, client_reader, client_writer)
}

/// Serialise a [`JSONRPCMessage`], append a `\n` delimiter and write it to
/// `writer`.
pub async fn send_message<W>(writer: &mut W, message: &JSONRPCMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    writer.write_all(&json).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single newline-delimited JSON-RPC message.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<JSONRPCMessage>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.is_empty() {
        return Err(Error::Transport("Stream closed".into()));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(serde_json::from_slice(&buf)?)
}

/// Serve `registry` in-process and connect a plain client to it.
pub async fn connected_client_and_server(
    registry: CapabilityRegistry,
) -> Result<(Client<()>, ServerHandle)> {
    connected_client_and_server_with_conn(registry, (), ServerConfig::default()).await
}

/// Serve `registry` in-process with `config` and connect a client using
/// `client_connection` for its hooks.
pub async fn connected_client_and_server_with_conn<C>(
    registry: CapabilityRegistry,
    client_connection: C,
    config: ServerConfig,
) -> Result<(Client<C>, ServerHandle)>
where
    C: ClientConn,
{
    let server = Server::new("test-server", "1.0.0", registry).with_config(config);
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();
    let server_handle = ServerHandle::from_stream(server, server_reader, server_writer).await?;

    let client = Client::new_with_connection("test-client", "1.0.0", client_connection);
    client.connect_stream(client_reader, client_writer).await?;

    Ok((client, server_handle))
}

/// Close the client, then give the server a moment to notice.
pub async fn shutdown_client_and_server<C>(client: Client<C>, server: ServerHandle)
where
    C: ClientConn,
{
    let _ = client.close().await;
    drop(client);
    let _ = tokio::time::timeout(Duration::from_millis(100), server.stop()).await;
}

/// A [`ServerCtx`] that is not attached to any transport. Everything it sends
/// lands in a queue the test reads from, and responses are fed back in with
/// [`TestServerContext::respond`].
pub struct TestServerContext {
    ctx: ServerCtx,
    requests: RequestHandler,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    outbound: mpsc::UnboundedReceiver<JSONRPCMessage>,
}

impl TestServerContext {
    pub fn with_registry(registry: CapabilityRegistry) -> Self {
        let (tx, outbound) = mpsc::unbounded_channel();
        let requests = RequestHandler::new(tx, "test-req");
        let dispatcher = Dispatcher::new(Arc::new(registry));
        let shutdown = CancellationToken::new();
        let ctx = ServerCtx::new(
            requests.clone(),
            dispatcher.clone(),
            shutdown.clone(),
            ServerConfig::default().sampling_timeout,
        );
        Self {
            ctx,
            requests,
            dispatcher,
            shutdown,
            outbound,
        }
    }

    pub fn with_sampling_timeout(mut self, timeout: Duration) -> Self {
        self.ctx = ServerCtx::new(
            self.requests.clone(),
            self.dispatcher.clone(),
            self.shutdown.clone(),
            timeout,
        );
        self
    }

    pub fn ctx(&self) -> &ServerCtx {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// A context for a request that asked for progress under `token`.
    pub fn with_progress_token(&self, token: ProgressToken) -> ServerCtx {
        self.ctx.for_request(
            RequestId::Number(1),
            Some(token),
            self.shutdown.child_token(),
        )
    }

    /// Simulate the connection closing.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Number of requests still waiting for an answer.
    pub fn pending(&self) -> usize {
        self.requests.pending()
    }

    /// Feed a response from the "client" back to the context.
    pub fn respond(&self, response: JSONRPCResponse) {
        self.requests.handle_response(response);
    }

    pub fn try_recv(&mut self) -> Option<JSONRPCMessage> {
        self.outbound.try_recv().ok()
    }

    /// Next outbound message. Panics if none arrives in time.
    pub async fn recv(&mut self) -> JSONRPCMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("outbound queue closed"),
            Err(_) => panic!("no outbound message within {RECV_TIMEOUT:?}"),
        }
    }

    /// Next outbound notification, skipping any other messages.
    pub async fn recv_notification(&mut self) -> JSONRPCNotification {
        loop {
            if let JSONRPCMessage::Notification(notification) = self.recv().await {
                return notification;
            }
        }
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
