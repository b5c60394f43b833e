use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader, ReadBuf},
    net::TcpStream,
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_util::codec::Framed;
use tracing::info;
use url::Url;

use crate::{
    codec::JsonRpcCodec,
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Transport trait for different connection types
#[async_trait]
pub trait Transport: Send {
    /// Establish the underlying connection.
    async fn connect(&mut self) -> Result<()>;

    /// Get a framed stream for reading/writing JSON-RPC messages
    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>>;
}

/// Trait for a bidirectional stream of JSON-RPC messages
pub trait TransportStream:
    Stream<Item = Result<JSONRPCMessage>> + Sink<JSONRPCMessage, Error = Error> + Send + Unpin
{
}

impl<T> TransportStream for Framed<T, JsonRpcCodec> where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A duplex wrapper combining separate AsyncRead and AsyncWrite halves.
pub struct GenericDuplex<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> GenericDuplex<R, W>
where
    R: AsyncRead,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl<R, W> AsyncRead for GenericDuplex<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for GenericDuplex<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Standard I/O transport using stdin/stdout
#[derive(Default)]
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Stdio transport ready");
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let duplex = GenericDuplex::new(tokio::io::stdin(), tokio::io::stdout());
        Ok(Box::new(Framed::new(duplex, JsonRpcCodec::new())))
    }
}

/// Wrapper to turn any already-connected AsyncRead + AsyncWrite stream into
/// a Transport
pub struct StreamTransport<S> {
    stream: Option<S>,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let stream = self
            .stream
            .ok_or_else(|| Error::Transport("stream already taken".into()))?;
        Ok(Box::new(Framed::new(stream, JsonRpcCodec::new())))
    }
}

/// TCP client transport for an already-running server. Accepts either
/// `host:port` or `tcp://host:port`.
pub struct TcpClientTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpClientTransport {
    pub fn new(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let url = if addr.contains("://") {
            Url::parse(addr)
        } else {
            Url::parse(&format!("tcp://{addr}"))
        }
        .map_err(|e| Error::Config(format!("invalid server address '{addr}': {e}")))?;

        if url.scheme() != "tcp" {
            return Err(Error::Config(format!(
                "unsupported scheme '{}' in '{addr}', expected tcp",
                url.scheme()
            )));
        }
        let (Some(host), Some(port)) = (url.host_str(), url.port()) else {
            return Err(Error::Config(format!(
                "server address '{addr}' needs a host and a port"
            )));
        };
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(Error::Config(format!(
                "server address '{addr}' must not carry a path or query"
            )));
        }
        Ok(Self {
            addr: format!("{host}:{port}"),
            stream: None,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to TCP endpoint: {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await?;
        self.stream = Some(stream);
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let stream = self
            .stream
            .ok_or_else(|| Error::Transport("TCP transport is not connected".into()))?;
        Ok(Box::new(Framed::new(stream, JsonRpcCodec::new())))
    }
}

/// Spawns a server process and speaks the protocol over its stdin/stdout.
/// The child is killed when the framed stream is dropped.
pub struct ProcessTransport {
    command: Command,
    program: String,
    child: Option<Child>,
}

impl ProcessTransport {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let program = program.into();
        let mut command = Command::new(&program);
        command.args(args);
        Self::from_command(program, command)
    }

    pub fn from_command(program: impl Into<String>, mut command: Command) -> Self {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        Self {
            command,
            program: program.into(),
            child: None,
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Spawning server process: {}", self.program);
        let child = self.command.spawn().map_err(|e| {
            Error::Transport(format!("failed to spawn '{}': {e}", self.program))
        })?;
        self.child = Some(child);
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let mut child = self
            .child
            .ok_or_else(|| Error::Transport("process transport is not connected".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout is not piped".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin is not piped".into()))?;
        let duplex = ChildDuplex {
            io: GenericDuplex::new(stdout, stdin),
            _child: child,
        };
        Ok(Box::new(Framed::new(duplex, JsonRpcCodec::new())))
    }
}

/// Child stdio plus the child handle, so the process lives exactly as long
/// as the stream.
struct ChildDuplex {
    io: GenericDuplex<ChildStdout, ChildStdin>,
    _child: Child,
}

impl AsyncRead for ChildDuplex {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildDuplex {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
