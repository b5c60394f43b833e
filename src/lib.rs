//! # research-mcp
//!
//! A Model Context Protocol session runtime together with the capability
//! catalog and client of a small research assistant.
//!
//! ## Overview
//!
//! A [`Server`] exposes the tools, resources and prompts held in a
//! [`CapabilityRegistry`]. Handlers receive a [`ServerCtx`] through which they
//! report progress, emit log records and ask the client's language model for
//! completions (sampling). A [`Client`] opens a session to a server, calls its
//! capabilities through the [`ServerAPI`] trait, and answers the server's
//! requests through a [`ClientConn`]. The [`ClientOrchestrator`] runs a fixed
//! connectivity check against a server, and [`ChatController`] combines the
//! background instruction captured during that check with each user turn.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use research_mcp::{
//!     schema::ToolInputSchema, Arguments, CapabilityRegistry, Result, Server, ServerCtx,
//!     ToolDescriptor,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = CapabilityRegistry::new().with_tool(ToolDescriptor::new(
//!         "echo",
//!         ToolInputSchema::default()
//!             .with_property("message", json!({"type": "string"}))
//!             .with_required("message"),
//!         |_ctx: ServerCtx, args: Arguments| async move {
//!             Ok(json!(format!("Echo: {}", args.get_string("message").unwrap_or_default())))
//!         },
//!     ))?;
//!
//!     Server::new("echo-server", "0.1.0", registry).serve_stdio().await
//! }
//! ```
//!
//! ## Transport Options
//!
//! - **Stdio**: `server.serve_stdio()`, or a spawned process on the client side
//! - **TCP**: `server.serve_tcp("127.0.0.1:3000")`
//! - **Streams**: any `AsyncRead`/`AsyncWrite` pair via `serve_stream`

mod api;
mod arguments;
mod client;
mod codec;
mod connection;
mod context;
mod dispatcher;
mod error;
mod events;
mod jsonrpc;
mod registry;
mod request_handler;
mod server;
mod transport;
mod uri_template;

pub mod catalog;
pub mod chat;
pub mod config;
pub mod orchestrator;
pub mod research;
pub mod schema;
pub mod testutils;

pub use api::*;
pub use arguments::Arguments;
pub use chat::{compose_request, ChatController, ChatState, ChatTurn, ResearchModel, ResearchRequest};
pub use client::Client;
pub use config::{FailurePolicy, OrchestratorConfig, ServerConfig, SessionConfig, TransportConfig};
pub use connection::ClientConn;
pub use context::ServerCtx;
pub use dispatcher::Dispatcher;
pub use error::{CapabilityKind, Error, Result};
pub use events::{LogRecord, ProgressEvent, SessionEvent};
pub use orchestrator::{
    CallOutcome, CallReport, ClientOrchestrator, OrchestratorState, PlannedCall, RunReport,
    SessionState,
};
pub use registry::{
    CapabilityRegistry, PromptDescriptor, PromptHandler, ResourceContent, ResourceDescriptor,
    ResourceHandler, ResourceRequest, ToolDescriptor, ToolHandler,
};
pub use server::{Server, ServerHandle};
pub use transport::{
    GenericDuplex, ProcessTransport, StdioTransport, StreamTransport, TcpClientTransport,
    Transport, TransportStream,
};
pub use uri_template::UriTemplate;

// Re-export schemars for users deriving tool parameter schemas
pub use schemars;
