//! MCP transport implementations.
//!
//! A transport moves opaque JSON-RPC text between this client and one remote
//! server. Four kinds exist: a child process on stdio, plain HTTP POST, HTTP
//! with server-sent event streams, and WebSocket. Each is created without any
//! I/O and connects lazily on the first `send`.

mod http;
mod socket;
mod stdio;
mod stream;

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use toolbridge_core::Config;
use url::Url;

use crate::endpoint::{EndpointDescriptor, TransportKind};
use crate::error::{McpError, TransportError};

pub use http::HttpTransport;
pub use socket::WebSocketTransport;
pub use stdio::StdioTransport;
pub use stream::{StreamSession, StreamableHttpTransport};

/// Header carrying the server-issued session token.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Accept header for POSTs that may be answered with JSON or a stream.
pub(crate) const ACCEPT_JSON_OR_STREAM: &str = "application/json, text/event-stream";

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send {
    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Send a message to the server.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next message from the server.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the transport connection. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Build the transport for an endpoint. No I/O happens here.
pub fn connect(endpoint: &EndpointDescriptor, config: &Config) -> Result<Box<dyn Transport>, McpError> {
    let transport: Box<dyn Transport> = match endpoint.kind {
        TransportKind::Subprocess => Box::new(StdioTransport::new(
            &endpoint.locator,
            endpoint.headers.clone(),
            config.timeouts.shutdown_grace(),
        )?),
        TransportKind::RequestResponse => Box::new(HttpTransport::new(
            parse_url(&endpoint.locator)?,
            endpoint.headers.clone(),
            config.discovery.max_body_bytes,
        )?),
        TransportKind::ServerStream => Box::new(StreamableHttpTransport::new(
            parse_url(&endpoint.locator)?,
            endpoint.headers.clone(),
            config.timeouts.handshake(),
            config.discovery.max_body_bytes,
        )?),
        TransportKind::Socket => Box::new(WebSocketTransport::new(
            parse_socket_url(&endpoint.locator)?,
            endpoint.headers.clone(),
        )),
    };
    Ok(transport)
}

/// Parse an HTTP locator.
pub fn parse_url(locator: &str) -> Result<Url, TransportError> {
    let url = Url::parse(locator.trim())
        .map_err(|e| TransportError::InvalidLocator(format!("{}: {}", locator, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransportError::InvalidLocator(format!(
            "expected an http(s) URL, got scheme '{}'",
            other
        ))),
    }
}

/// Parse a WebSocket locator. `http(s)` URLs are rewritten to `ws(s)`.
pub fn parse_socket_url(locator: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(locator.trim())
        .map_err(|e| TransportError::InvalidLocator(format!("{}: {}", locator, e)))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidLocator(format!(
                "expected a ws(s) URL, got scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidLocator(locator.to_string()))?;
    Ok(url)
}

pub(crate) fn http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .user_agent(concat!("toolbridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TransportError::Request(e.to_string()))
}

pub(crate) fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

pub(crate) fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn session_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a whole body, refusing anything larger than `max_bytes`.
pub(crate) async fn read_body(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<String, TransportError> {
    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(TransportError::Request(format!(
                "response body of {} bytes exceeds limit of {}",
                len, max_bytes
            )));
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() > max_bytes {
        return Err(TransportError::Request(format!(
            "response body of {} bytes exceeds limit of {}",
            bytes.len(),
            max_bytes
        )));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Turn a non-2xx response into an error carrying its body.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Http {
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
