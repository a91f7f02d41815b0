//! Server-stream HTTP transport.
//!
//! Covers both generations of HTTP streaming servers:
//!
//! - servers that hand out a session endpoint through an `endpoint` event
//!   on a long-lived GET stream, and answer on that stream;
//! - servers that answer each POST directly, with JSON or a short event
//!   stream, and track the session with an `Mcp-Session-Id` header.
//!
//! Which one a server speaks is worked out on the first `send`.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{
    apply_headers, check_status, content_type, http_client, read_body, session_header, Transport,
    ACCEPT_JSON_OR_STREAM, SESSION_HEADER,
};
use crate::endpoint::TransportKind;
use crate::error::TransportError;
use crate::frame::{FrameDecoder, Framing, SseEvent};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// An open response body decoded into events.
struct EventSource {
    stream: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<SseEvent>,
}

impl EventSource {
    fn new(response: reqwest::Response) -> Self {
        let framing =
            Framing::detect(content_type(&response).as_deref()).unwrap_or(Framing::EventStream);
        Self {
            stream: Box::pin(response.bytes_stream()),
            decoder: FrameDecoder::new(framing),
            pending: VecDeque::new(),
        }
    }

    /// Next event, or `None` once the stream has ended.
    async fn next_event(&mut self) -> Result<Option<SseEvent>, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.decoder.is_done() {
                return Ok(None);
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.pending.extend(self.decoder.finish());
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Session state negotiated with a streaming server.
#[derive(Default)]
pub struct StreamSession {
    /// Server-issued token sent back as `Mcp-Session-Id`.
    pub token: Option<String>,
    /// Session-scoped URL that POSTs go to.
    pub endpoint: Option<Url>,
    handshake: Option<EventSource>,
    handshake_attempted: bool,
}

impl StreamSession {
    fn is_established(&self) -> bool {
        self.token.is_some() || self.endpoint.is_some()
    }
}

/// HTTP transport for servers that stream replies.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    base: Url,
    headers: HashMap<String, String>,
    handshake_timeout: Duration,
    max_body_bytes: usize,
    session: StreamSession,
    /// Reply stream of the latest POST, or one opened at a next URL.
    replies: Option<EventSource>,
    queue: VecDeque<String>,
    closed: bool,
}

impl StreamableHttpTransport {
    pub fn new(
        base: Url,
        headers: HashMap<String, String>,
        handshake_timeout: Duration,
        max_body_bytes: usize,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client: http_client()?,
            base,
            headers,
            handshake_timeout,
            max_body_bytes,
            session: StreamSession::default(),
            replies: None,
            queue: VecDeque::new(),
            closed: false,
        })
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = apply_headers(self.client.request(method, url), &self.headers);
        if let Some(token) = &self.session.token {
            builder = builder.header(SESSION_HEADER, token.as_str());
        }
        builder
    }

    /// Open the GET stream and wait for the `endpoint` event.
    ///
    /// Any failure just means the server does not use this handshake.
    async fn handshake(&mut self) {
        self.session.handshake_attempted = true;
        let request = self
            .request(reqwest::Method::GET, self.base.clone())
            .header(ACCEPT, "text/event-stream");
        let attempt = open_handshake(request, self.base.clone());

        match tokio::time::timeout(self.handshake_timeout, attempt).await {
            Ok(Ok(Some((source, endpoint, token)))) => {
                debug!(endpoint = %endpoint, "Stream handshake established session endpoint");
                self.session.endpoint = Some(endpoint);
                if token.is_some() {
                    self.session.token = token;
                }
                self.session.handshake = Some(source);
            }
            Ok(Ok(None)) => debug!("Server offered no stream handshake"),
            Ok(Err(e)) => debug!(error = %e, "Stream handshake failed"),
            Err(_) => debug!("Stream handshake timed out"),
        }
    }

    /// Record a 202 answer: a token and possibly where replies will appear.
    async fn accept(&mut self, location: Option<String>, body: &str) {
        let doc: Option<Value> = serde_json::from_str(body.trim()).ok();
        let field = |names: &[&str]| {
            doc.as_ref().and_then(|d| {
                names
                    .iter()
                    .find_map(|n| d.get(*n).and_then(Value::as_str).map(str::to_string))
            })
        };

        if let Some(token) = field(&["sessionId", "session_id"]) {
            self.session.token = Some(token);
        }

        let next = location.or_else(|| field(&["endpoint", "url"]));
        let Some(next) = next else { return };
        if self.session.handshake.is_some() {
            return;
        }

        let url = match self.base.join(next.trim()) {
            Ok(url) => url,
            Err(e) => {
                warn!(next = %next, error = %e, "Ignoring unusable next URL");
                return;
            }
        };

        debug!(url = %url, "Opening reply stream");
        let request = self
            .request(reqwest::Method::GET, url)
            .header(ACCEPT, "text/event-stream");
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                self.replies = Some(EventSource::new(response));
            }
            Ok(response) => warn!(status = %response.status(), "Reply stream refused"),
            Err(e) => warn!(error = %e, "Reply stream failed"),
        }
    }
}

type Handshake = (EventSource, Url, Option<String>);

async fn open_handshake(
    request: reqwest::RequestBuilder,
    base: Url,
) -> Result<Option<Handshake>, TransportError> {
    let response = check_status(request.send().await?).await?;
    let token = session_header(&response);
    let is_stream = content_type(&response)
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);
    if !is_stream {
        return Ok(None);
    }

    let mut source = EventSource::new(response);
    while let Some(event) = source.next_event().await? {
        if event.is_endpoint() {
            let endpoint = base
                .join(event.data.trim())
                .map_err(|e| TransportError::InvalidLocator(e.to_string()))?;
            return Ok(Some((source, endpoint, token)));
        }
    }
    Ok(None)
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ServerStream
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }

        if !self.session.is_established() && !self.session.handshake_attempted {
            self.handshake().await;
        }

        let target = self.session.endpoint.clone().unwrap_or_else(|| self.base.clone());
        debug!(url = %target, message = message, "POST to streaming MCP server");

        let request = self
            .request(reqwest::Method::POST, target)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_STREAM)
            .body(message.to_string());
        let response = check_status(request.send().await?).await?;

        if let Some(token) = session_header(&response) {
            self.session.token = Some(token);
        }

        if response.status() == StatusCode::ACCEPTED {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = read_body(response, self.max_body_bytes).await?;
            self.accept(location, &body).await;
            return Ok(());
        }

        match Framing::detect(content_type(&response).as_deref()) {
            Some(_) => self.replies = Some(EventSource::new(response)),
            None => {
                let body = read_body(response, self.max_body_bytes).await?;
                if !body.trim().is_empty() {
                    self.queue.push_back(body);
                }
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }

        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }

            if let Some(replies) = self.replies.as_mut() {
                match replies.next_event().await? {
                    Some(event) if event.is_endpoint() || event.data.trim().is_empty() => continue,
                    Some(event) => return Ok(event.data),
                    None => {
                        self.replies = None;
                        continue;
                    }
                }
            }

            if let Some(handshake) = self.session.handshake.as_mut() {
                match handshake.next_event().await? {
                    Some(event) if event.is_endpoint() => {
                        if let Ok(url) = self.base.join(event.data.trim()) {
                            self.session.endpoint = Some(url);
                        }
                        continue;
                    }
                    Some(event) if event.data.trim().is_empty() => continue,
                    Some(event) => return Ok(event.data),
                    None => {
                        self.session.handshake = None;
                        continue;
                    }
                }
            }

            return Err(TransportError::ConnectionClosed);
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            debug!(url = %self.base, "Closing streaming MCP transport");
        }
        self.closed = true;
        self.replies = None;
        self.queue.clear();
        self.session = StreamSession::default();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed && (self.session.handshake.is_some() || self.session.is_established())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer, path: &str) -> StreamableHttpTransport {
        let url = Url::parse(&format!("{}{}", server.uri(), path)).unwrap();
        StreamableHttpTransport::new(url, HashMap::new(), Duration::from_millis(500), 1 << 20)
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_reply_with_session_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "tok-1")
                    .set_body_raw(
                        "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n",
                        "text/event-stream",
                    ),
            )
            .mount(&server)
            .await;

        let mut t = transport(&server, "/mcp");
        t.send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).await.unwrap();
        assert_eq!(t.session().token.as_deref(), Some("tok-1"));
        assert_eq!(t.receive().await.unwrap(), r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert!(t.is_connected());
    }

    #[tokio::test]
    async fn test_token_is_sent_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header(SESSION_HEADER, "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{\"second\":true}", "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "tok-2")
                    .set_body_raw("{\"first\":true}", "application/json"),
            )
            .mount(&server)
            .await;

        let mut t = transport(&server, "/mcp");
        t.send("{}").await.unwrap();
        assert_eq!(t.receive().await.unwrap(), "{\"first\":true}");
        t.send("{}").await.unwrap();
        assert_eq!(t.receive().await.unwrap(), "{\"second\":true}");
    }

    #[tokio::test]
    async fn test_accepted_opens_stream_at_next_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_raw(r#"{"sessionId":"abc","endpoint":"/replies/abc"}"#, "application/json"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/replies/abc"))
            .and(header(SESSION_HEADER, "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"reply\":1}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let mut t = transport(&server, "/mcp");
        t.send("{}").await.unwrap();
        assert_eq!(t.session().token.as_deref(), Some("abc"));
        assert_eq!(t.receive().await.unwrap(), "{\"reply\":1}");
    }

    #[tokio::test]
    async fn test_handshake_endpoint_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "event: endpoint\ndata: /messages?session_id=xyz\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{\"ok\":true}", "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let mut t = transport(&server, "/sse");
        t.send("{}").await.unwrap();
        let endpoint = t.session().endpoint.clone().unwrap();
        assert_eq!(endpoint.path(), "/messages");
        assert_eq!(endpoint.query(), Some("session_id=xyz"));
        assert_eq!(t.receive().await.unwrap(), "{\"ok\":true}");

        t.close().await.unwrap();
        assert!(!t.is_connected());
        assert!(t.session().endpoint.is_none());
    }

    #[tokio::test]
    async fn test_error_status_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let mut t = transport(&server, "/mcp");
        assert!(matches!(
            t.send("{}").await,
            Err(TransportError::Http { status: 401, .. })
        ));
    }
}
