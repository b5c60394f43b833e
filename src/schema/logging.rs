use std::fmt;

use serde::{Deserialize, Serialize};

/// Log severity, ordered from least to most severe (RFC 5424).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Notice => "notice",
            LoggingLevel::Warning => "warning",
            LoggingLevel::Error => "error",
            LoggingLevel::Critical => "critical",
            LoggingLevel::Alert => "alert",
            LoggingLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_level_ordering() {
        assert!(LoggingLevel::Emergency > LoggingLevel::Alert);
        assert!(LoggingLevel::Critical > LoggingLevel::Error);
        assert!(LoggingLevel::Error > LoggingLevel::Warning);
        assert!(LoggingLevel::Warning > LoggingLevel::Notice);
        assert!(LoggingLevel::Notice > LoggingLevel::Info);
        assert!(LoggingLevel::Info > LoggingLevel::Debug);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&LoggingLevel::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(LoggingLevel::Emergency.to_string(), "emergency");
    }
}
