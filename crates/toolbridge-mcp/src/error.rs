//! Error types for the server communication layer.

use std::time::Duration;

use thiserror::Error;

/// Errors raised at the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// Remote answered with a non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// HTTP request could not be sent or its body read.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// WebSocket failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// Locator cannot be used with this transport.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Self::Request(e.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::ConnectionClosed,
            other => Self::Socket(other.to_string()),
        }
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A deadline expired at a suspension point.
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout { stage: String, after: Duration },

    /// Well-formed transport response with invalid or unexpected content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned a JSON-RPC error response.
    #[error("server error (code {code}): {message}")]
    Server { code: i64, message: String },

    /// No capability-shaped data found after every strategy.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport label maps to no known transport kind.
    #[error("unknown transport '{0}'")]
    UnknownTransport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session used out of order.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error for a named stage.
    pub fn timeout(stage: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            after,
        }
    }

    /// Create a server error from a JSON-RPC error object.
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Taxonomy bucket reported to callers.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Protocol(_) | Self::Server { .. } | Self::Json(_) | Self::InvalidState { .. } => {
                "protocol"
            }
            Self::NotFound(_) => "not-found",
            Self::UnknownTransport(_) => "config",
        }
    }

    /// Whether this is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<McpError> for toolbridge_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::UnknownTransport(label) => toolbridge_core::Error::UnknownTransport(label),
            McpError::Timeout { after, .. } => toolbridge_core::Error::Timeout(after.as_secs()),
            other => toolbridge_core::Error::Mcp(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");

        let err = TransportError::Http {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::server_error(-32601, "Method not found");
        assert_eq!(err.to_string(), "server error (code -32601): Method not found");

        let err = McpError::timeout("initialize", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "initialize timed out after 1500ms");
    }

    #[test]
    fn test_categories() {
        assert_eq!(McpError::from(TransportError::NotConnected).category(), "transport");
        assert_eq!(McpError::timeout("x", Duration::ZERO).category(), "timeout");
        assert_eq!(McpError::protocol("bad").category(), "protocol");
        assert_eq!(McpError::server_error(1, "x").category(), "protocol");
        assert_eq!(McpError::NotFound("x".into()).category(), "not-found");
        assert_eq!(McpError::UnknownTransport("x".into()).category(), "config");
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let core_err: toolbridge_core::Error = McpError::protocol("test error").into();
        assert!(matches!(core_err, toolbridge_core::Error::Mcp(_)));

        let core_err: toolbridge_core::Error = McpError::UnknownTransport("pigeon".into()).into();
        assert!(matches!(core_err, toolbridge_core::Error::UnknownTransport(_)));
    }
}
