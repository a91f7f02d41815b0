//! Request/response HTTP transport: one POST per message.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use super::{
    apply_headers, check_status, content_type, http_client, read_body, session_header, Transport,
    ACCEPT_JSON_OR_STREAM, SESSION_HEADER,
};
use crate::endpoint::TransportKind;
use crate::error::TransportError;
use crate::frame::{decode_body, Framing};

/// Plain HTTP transport.
///
/// Replies arrive in the POST response body and are queued for `receive`.
/// A server-issued session id is echoed on later requests.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    headers: HashMap<String, String>,
    max_body_bytes: usize,
    session_id: Option<String>,
    queue: VecDeque<String>,
    closed: bool,
}

impl HttpTransport {
    pub fn new(
        url: Url,
        headers: HashMap<String, String>,
        max_body_bytes: usize,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client: http_client()?,
            url,
            headers,
            max_body_bytes,
            session_id: None,
            queue: VecDeque::new(),
            closed: false,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::RequestResponse
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }

        debug!(url = %self.url, message = message, "POST to MCP server");
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_STREAM);
        request = apply_headers(request, &self.headers);
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_HEADER, id.as_str());
        }

        let response = check_status(request.body(message.to_string()).send().await?).await?;
        if let Some(id) = session_header(&response) {
            self.session_id = Some(id);
        }

        let framing = Framing::detect(content_type(&response).as_deref());
        let body = read_body(response, self.max_body_bytes).await?;
        match framing {
            Some(framing) => {
                self.queue
                    .extend(decode_body(&body, framing).into_iter().map(|e| e.data));
            }
            None if !body.trim().is_empty() => self.queue.push_back(body),
            None => {}
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        self.queue.pop_front().ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.queue.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}
