//! WebSocket transport.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::Transport;
use crate::endpoint::TransportKind;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One bidirectional WebSocket per session, one JSON-RPC message per frame.
pub struct WebSocketTransport {
    url: Url,
    headers: HashMap<String, String>,
    socket: Option<WsStream>,
    closed: bool,
}

impl WebSocketTransport {
    pub fn new(url: Url, headers: HashMap<String, String>) -> Self {
        Self {
            url,
            headers,
            socket: None,
            closed: false,
        }
    }

    async fn socket(&mut self) -> Result<&mut WsStream, TransportError> {
        if self.socket.is_none() {
            let mut request = self.url.as_str().into_client_request()?;
            for (key, value) in &self.headers {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| TransportError::InvalidLocator(format!("header '{}': {}", key, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| TransportError::InvalidLocator(format!("header '{}': {}", key, e)))?;
                request.headers_mut().insert(name, value);
            }

            debug!(url = %self.url, "Connecting to MCP server over WebSocket");
            let (stream, _) = connect_async(request).await?;
            self.socket = Some(stream);
        }
        self.socket.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        debug!(message = message, "Sending WebSocket frame");
        let socket = self.socket().await?;
        socket.send(Message::text(message.to_string())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;

        while let Some(frame) = socket.next().await {
            match frame? {
                Message::Text(text) => return Ok(text.as_str().to_string()),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => warn!(len = data.len(), "Skipping non-UTF-8 binary frame"),
                },
                Message::Ping(payload) => socket.send(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    debug!(frame = ?frame, "WebSocket closed by server");
                    return Err(TransportError::ConnectionClosed);
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Err(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        if let Some(mut socket) = self.socket.take() {
            debug!(url = %self.url, "Closing WebSocket");
            if let Err(e) = socket.close(None).await {
                debug!(error = %e, "WebSocket close handshake failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed && self.socket.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Ping(vec![1, 2].into())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    ws.send(Message::binary(text.as_str().as_bytes().to_vec()))
                        .await
                        .unwrap();
                }
            }
        });
        Url::parse(&format!("ws://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_with_ping_and_binary() {
        let url = echo_server().await;
        let mut transport = WebSocketTransport::new(url, HashMap::new());
        assert!(!transport.is_connected());

        transport.send(r#"{"id":1}"#).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.receive().await.unwrap(), r#"{"id":1}"#);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(matches!(transport.send("{}").await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}", addr)).unwrap();
        let mut transport = WebSocketTransport::new(url, HashMap::new());
        assert!(transport.send("{}").await.is_err());
    }
}
