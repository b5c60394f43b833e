use serde_json::Value;

use crate::schema::LoggingLevel;

/// Progress of the invocation currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub current: f64,
    pub total: Option<f64>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.current >= total)
    }
}

/// A log record emitted by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LoggingLevel,
    pub logger: Option<String>,
    pub data: Value,
}

/// Events observed on an open client session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Log(LogRecord),
}
