use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    events::LogRecord,
    schema::{CreateMessageParams, CreateMessageResult, Implementation},
};

/// Client-side hooks for one session. The defaults answer pings, refuse
/// sampling and ignore log records.
///
/// All methods take `&self`: server requests are answered concurrently, so
/// implementations keep any mutable state behind interior mutability.
#[async_trait]
pub trait ClientConn: Send + Sync + 'static {
    /// Called once the handshake with `server` has completed
    async fn on_connect(&self, _server: &Implementation) -> Result<()> {
        Ok(())
    }

    /// Called when an open session is closed
    async fn on_disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Respond to a ping from the server
    async fn pong(&self) -> Result<()> {
        Ok(())
    }

    /// Handle `sampling/createMessage` from the server
    async fn create_message(&self, _params: CreateMessageParams) -> Result<CreateMessageResult> {
        Err(Error::MethodNotFound("sampling/createMessage".to_string()))
    }

    /// Receive a server log record. Runs on its own task, so a slow hook
    /// never stalls the session.
    async fn on_log(&self, _record: LogRecord) {}
}

#[async_trait]
impl ClientConn for () {}
