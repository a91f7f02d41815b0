//! Endpoint descriptors and transport label normalization.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McpError, TransportError};

/// How a remote server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Local child process speaking newline-delimited JSON on stdio.
    Subprocess,
    /// Plain HTTP, one POST per message.
    RequestResponse,
    /// HTTP with server-sent events and session tokens.
    ServerStream,
    /// Bidirectional WebSocket.
    Socket,
}

impl TransportKind {
    /// Map a free-form transport label onto a kind.
    ///
    /// Matching ignores case and surrounding whitespace, and treats `_` as `-`.
    pub fn from_label(label: &str) -> Result<Self, McpError> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
        let kind = match normalized.as_str() {
            "stdio" | "subprocess" | "command" | "local" | "process" => Self::Subprocess,
            "http" | "https" | "post" | "rest" | "request-response" | "json-rpc" => {
                Self::RequestResponse
            }
            "sse" | "streamable-http" | "streamablehttp" | "http-stream" | "server-stream"
            | "stream" => Self::ServerStream,
            "websocket" | "ws" | "wss" | "socket" => Self::Socket,
            _ => return Err(McpError::UnknownTransport(label.to_string())),
        };
        Ok(kind)
    }

    /// Canonical label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::RequestResponse => "request-response",
            Self::ServerStream => "server-stream",
            Self::Socket => "socket",
        }
    }

    /// HTTP kinds get the fallback cascade.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::RequestResponse | Self::ServerStream)
    }
}

impl FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound on any end-to-end deadline.
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything needed to reach one remote server for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// URL, or command line for subprocess endpoints.
    pub locator: String,
    /// Transport used to reach the server.
    pub kind: TransportKind,
    /// HTTP/WebSocket headers, or the child environment for subprocesses.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Overrides the configured end-to-end deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl EndpointDescriptor {
    pub fn new(locator: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            locator: locator.into(),
            kind,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Build a descriptor from a locator and a transport label.
    pub fn parse(locator: impl Into<String>, label: &str) -> Result<Self, McpError> {
        Ok(Self::new(locator, TransportKind::from_label(label)?))
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Override the end-to-end deadline, capped at [`MAX_BUDGET`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.min(MAX_BUDGET));
        self
    }

    /// The descriptor override, or `default`, capped at [`MAX_BUDGET`].
    pub fn budget(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default).min(MAX_BUDGET)
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.locator, self.kind)
    }
}

/// Split a command line into program and arguments without a shell.
///
/// Single quotes are literal, double quotes allow `\"` and `\\`, and a
/// backslash outside quotes escapes the next character.
pub fn split_command_line(line: &str) -> Result<Vec<String>, TransportError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(TransportError::InvalidLocator(format!(
                                "unterminated single quote in '{}'",
                                line
                            )))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => break,
                        },
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(TransportError::InvalidLocator(format!(
                                "unterminated double quote in '{}'",
                                line
                            )))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    if words.is_empty() {
        return Err(TransportError::InvalidLocator("empty command".to_string()));
    }
    Ok(words)
}
