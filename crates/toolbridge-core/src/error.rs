//! Error types for Toolbridge.
//!
//! Library crates keep their own error enums; this is the type they convert
//! into at the application boundary, with recovery suggestions attached.

use thiserror::Error;

/// Result type alias using the Toolbridge error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Toolbridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised by the server communication layer
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Unknown transport label
    #[error("Unknown transport '{0}'")]
    UnknownTransport(String),

    /// Configuration loaded but failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Deadline exceeded
    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => {
                Some("Check your config file at ~/.config/toolbridge/config.toml")
            }
            Error::UnknownTransport(_) => {
                Some("Use one of: stdio, http, sse, streamable-http, websocket")
            }
            Error::Validation(_) => Some("Run 'toolbridge config validate' for details"),
            Error::Timeout(_) => Some("Raise the timeout with --timeout or in [timeouts]"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_transport_has_suggestion() {
        let err = Error::UnknownTransport("carrier-pigeon".to_string());
        assert!(err.to_string().contains("carrier-pigeon"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Timeout(5);
        let text = format_error_with_suggestion(&err);
        assert!(text.starts_with("Timed out after 5s"));
        assert!(text.contains("Suggestion:"));
    }

    #[test]
    fn test_mcp_error_has_no_suggestion() {
        let err = Error::Mcp("connection closed".to_string());
        assert_eq!(format_error_with_suggestion(&err), "MCP error: connection closed");
    }
}
