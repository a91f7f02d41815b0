//! Standard MCP protocol client.
//!
//! A [`Session`] owns one transport for the length of a single discovery,
//! invocation or probe. It runs the `initialize` handshake, lists whatever
//! the server advertises, and always closes the transport on the way out.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use toolbridge_core::config::ClientConfig;
use toolbridge_core::Config;

use crate::capability::{CapabilityDescriptor, CapabilityFamily};
use crate::endpoint::TransportKind;
use crate::error::McpError;
use crate::protocol::{
    methods, CallToolParams, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, ListPage, PromptDefinition, ResourceDefinition,
    ServerCapabilities, ServerInfo, ToolDefinition,
};
use crate::transport::Transport;

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Unopened,
    /// `initialize` in flight.
    Initializing,
    /// Capabilities known.
    Negotiated,
    /// `*/list` round trips in progress.
    Listing,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unopened => write!(f, "unopened"),
            Self::Initializing => write!(f, "initializing"),
            Self::Negotiated => write!(f, "negotiated"),
            Self::Listing => write!(f, "listing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Capabilities gathered by one session.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Skipped kinds and other remarks worth surfacing.
    pub notes: Vec<String>,
    /// The server declared no listable capability at all.
    pub advertised_nothing: bool,
}

impl Listing {
    /// An empty listing the server vouched for.
    pub fn is_authoritative_empty(&self) -> bool {
        self.advertised_nothing && self.capabilities.is_empty()
    }
}

/// A failed invocation, split by whether `tools/call` went out.
#[derive(Debug)]
pub enum InvokeFailure {
    /// Nothing reached the tool: spawn, connect or `initialize` failed.
    Setup(McpError),
    /// `tools/call` was sent; the tool may have run.
    Call(McpError),
}

impl InvokeFailure {
    pub fn error(&self) -> &McpError {
        match self {
            Self::Setup(e) | Self::Call(e) => e,
        }
    }

    pub fn into_error(self) -> McpError {
        match self {
            Self::Setup(e) | Self::Call(e) => e,
        }
    }
}

impl From<InvokeFailure> for McpError {
    fn from(failure: InvokeFailure) -> Self {
        failure.into_error()
    }
}

/// One protocol session over one transport.
pub struct Session {
    name: String,
    transport: Box<dyn Transport>,
    state: SessionState,
    next_id: u64,
    request_timeout: Duration,
    deadline: Option<Instant>,
    client: ClientConfig,
    max_pages: usize,
    capabilities: Option<ServerCapabilities>,
    server_info: Option<ServerInfo>,
    call_sent: bool,
}

impl Session {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>, config: &Config) -> Self {
        Self {
            name: name.into(),
            transport,
            state: SessionState::Unopened,
            next_id: 1,
            request_timeout: config.timeouts.request(),
            deadline: None,
            client: config.client.clone(),
            max_pages: config.discovery.max_list_pages,
            capabilities: None,
            server_info: None,
            call_sent: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Server capabilities, once negotiated.
    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Request deadline clipped to what is left of the session budget.
    fn request_budget(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .request_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.request_timeout,
        }
    }

    /// Whatever is left of the session budget; tool calls get all of it.
    fn call_budget(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.request_timeout,
        }
    }

    fn fail(&mut self, error: McpError) -> McpError {
        debug!(server = %self.name, state = %self.state, error = %error, "Session failed");
        self.state = SessionState::Failed;
        error
    }

    /// Send a request and wait for the response carrying its id.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let budget = self.request_budget();
        self.request_within(method, params, budget).await
    }

    async fn request_within(
        &mut self,
        method: &str,
        params: Option<Value>,
        budget: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let text = JsonRpcRequest::new(id, method, params).encode()?;

        debug!(server = %self.name, id = id, method = method, "Sending request");
        match tokio::time::timeout(budget, exchange(self.transport.as_mut(), &text, id)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(method, budget)),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let text = JsonRpcNotification::new(method, params).encode()?;
        let budget = self.request_budget();
        match tokio::time::timeout(budget, self.transport.send(&text)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(McpError::timeout(method, budget)),
        }
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&mut self) -> Result<&ServerCapabilities, McpError> {
        if self.state != SessionState::Unopened {
            return Err(McpError::invalid_state("unopened", self.state.to_string()));
        }
        self.state = SessionState::Initializing;
        debug!(server = %self.name, kind = %self.kind(), "Initializing MCP session");

        let params = serde_json::to_value(InitializeParams::from_config(&self.client))?;
        let result = match self.request(methods::INITIALIZE, Some(params)).await {
            Ok(result) => result,
            Err(e) => return Err(self.fail(e)),
        };
        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(e) => {
                let e = McpError::protocol(format!("malformed initialize result: {}", e));
                return Err(self.fail(e));
            }
        };

        if let Err(e) = self.notify(methods::INITIALIZED, None).await {
            warn!(server = %self.name, error = %e, "Failed to deliver initialized notification");
        }

        info!(
            server = %self.name,
            server_name = %init.server_info.name,
            protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
            "MCP session initialized"
        );

        self.state = SessionState::Negotiated;
        self.server_info = Some(init.server_info);
        Ok(self.capabilities.insert(init.capabilities))
    }

    /// List every advertised capability kind.
    pub async fn list_all(&mut self) -> Result<Listing, McpError> {
        if self.state != SessionState::Negotiated {
            return Err(McpError::invalid_state("negotiated", self.state.to_string()));
        }
        let caps = self.capabilities.clone().unwrap_or_default();

        if caps.is_empty() {
            self.state = SessionState::Done;
            return Ok(Listing {
                capabilities: Vec::new(),
                notes: vec!["server advertises no tools, prompts or resources".to_string()],
                advertised_nothing: true,
            });
        }

        self.state = SessionState::Listing;
        let families: Vec<CapabilityFamily> = [
            (CapabilityFamily::Tools, caps.supports_tools()),
            (CapabilityFamily::Prompts, caps.supports_prompts()),
            (CapabilityFamily::Resources, caps.supports_resources()),
        ]
        .into_iter()
        .filter_map(|(family, advertised)| advertised.then_some(family))
        .collect();

        let mut listing = Listing::default();
        for family in &families {
            let listed = match family {
                CapabilityFamily::Tools => {
                    self.list_family::<ToolDefinition>(methods::TOOLS_LIST, "tools").await
                }
                CapabilityFamily::Prompts => {
                    self.list_family::<PromptDefinition>(methods::PROMPTS_LIST, "prompts").await
                }
                CapabilityFamily::Resources => {
                    self.list_family::<ResourceDefinition>(methods::RESOURCES_LIST, "resources")
                        .await
                }
            };

            match listed {
                Ok(items) => listing.capabilities.extend(items),
                Err(McpError::Server { code, message })
                    if *family != CapabilityFamily::Tools && families.len() > 1 =>
                {
                    warn!(server = %self.name, family = ?family, code = code, "Skipping capability kind");
                    listing
                        .notes
                        .push(format!("{:?} listing refused (code {}): {}", family, code, message));
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.state = SessionState::Done;
        debug!(
            server = %self.name,
            count = listing.capabilities.len(),
            "Listed capabilities"
        );
        Ok(listing)
    }

    /// Follow `nextCursor` pages of one `*/list` method, reading items from `key`.
    async fn list_family<T>(
        &mut self,
        method: &str,
        key: &str,
    ) -> Result<Vec<CapabilityDescriptor>, McpError>
    where
        T: DeserializeOwned + Into<CapabilityDescriptor>,
    {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for page_no in 1..=self.max_pages {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self.request(method, params).await?;
            let page = ListPage::from_result(result, key)
                .map_err(|e| McpError::protocol(format!("malformed {} result: {}", method, e)))?;

            for item in page.items {
                match serde_json::from_value::<T>(item) {
                    Ok(def) => out.push(def.into()),
                    Err(e) => debug!(method = method, error = %e, "Skipping malformed entry"),
                }
            }

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if page_no < self.max_pages => cursor = Some(next),
                Some(_) => warn!(method = method, pages = page_no, "Pagination limit reached"),
                None => break,
            }
        }
        Ok(out)
    }

    /// Call a tool and return the raw `tools/call` result.
    ///
    /// The call is bounded by the rest of the session budget rather than the
    /// per-request timeout.
    pub async fn call_tool(&mut self, name: &str, arguments: Option<Value>) -> Result<Value, McpError> {
        if self.state != SessionState::Negotiated {
            return Err(McpError::invalid_state("negotiated", self.state.to_string()));
        }
        debug!(server = %self.name, tool = name, "Calling tool");
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.call_sent = true;
        let budget = self.call_budget();
        match self.request_within(methods::TOOLS_CALL, Some(params), budget).await {
            Ok(result) => {
                self.state = SessionState::Done;
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Close the transport. Errors are logged, never returned.
    pub async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!(server = %self.name, error = %e, "Error while closing transport");
        }
    }

    fn start_budget(&mut self, budget: Duration) {
        self.deadline = Instant::now().checked_add(budget);
    }

    fn expired(&mut self, stage: &str, budget: Duration) -> McpError {
        self.fail(McpError::timeout(stage, budget))
    }

    /// Initialize and list everything within `budget`, then close.
    pub async fn discover(mut self, budget: Duration) -> Result<Listing, McpError> {
        self.start_budget(budget);
        let outcome = tokio::time::timeout(budget, async {
            self.initialize().await?;
            self.list_all().await
        })
        .await;
        self.close().await;
        outcome.unwrap_or_else(|_| Err(self.expired("discovery", budget)))
    }

    /// Initialize and call one tool within `budget`, then close.
    pub async fn invoke(
        mut self,
        name: &str,
        arguments: Option<Value>,
        budget: Duration,
    ) -> Result<Value, InvokeFailure> {
        self.start_budget(budget);
        let outcome = tokio::time::timeout(budget, async {
            self.initialize().await?;
            self.call_tool(name, arguments).await
        })
        .await;
        self.close().await;
        outcome
            .unwrap_or_else(|_| Err(self.expired("invocation", budget)))
            .map_err(|e| {
                if self.call_sent {
                    InvokeFailure::Call(e)
                } else {
                    InvokeFailure::Setup(e)
                }
            })
    }

    /// Initialize only, within `budget`, then close.
    pub async fn handshake(mut self, budget: Duration) -> Result<ServerCapabilities, McpError> {
        self.start_budget(budget);
        let outcome = tokio::time::timeout(budget, async {
            self.initialize().await.cloned()
        })
        .await;
        self.close().await;
        outcome.unwrap_or_else(|_| Err(self.expired("handshake", budget)))
    }
}

/// Send one envelope and read until the reply with `id` arrives.
async fn exchange(transport: &mut dyn Transport, text: &str, id: u64) -> Result<Value, McpError> {
    transport.send(text).await?;
    loop {
        let line = transport.receive().await?;
        match JsonRpcMessage::decode(&line) {
            Ok(message) if message.answers(id) => return message.into_result(),
            Ok(message) => match &message.method {
                Some(method) => debug!(method = %method, "Skipping server notification"),
                None => debug!(expected = id, got = ?message.id, "Skipping uncorrelated message"),
            },
            Err(e) => debug!(error = %e, "Skipping undecodable message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::TransportError;

    /// Scripted transport: each send pops the next batch of replies.
    struct Scripted {
        replies: VecDeque<Vec<String>>,
        inbox: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Scripted {
        fn new(replies: Vec<Vec<Value>>) -> (Self, Arc<Mutex<Vec<String>>>, Arc<Mutex<bool>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(Mutex::new(false));
            let t = Self {
                replies: replies
                    .into_iter()
                    .map(|batch| batch.into_iter().map(|v| v.to_string()).collect())
                    .collect(),
                inbox: VecDeque::new(),
                sent: sent.clone(),
                closed: closed.clone(),
            };
            (t, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            TransportKind::Subprocess
        }

        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.to_string());
            // Notifications get no reply batch.
            if message.contains("\"id\"") {
                if let Some(batch) = self.replies.pop_front() {
                    self.inbox.extend(batch);
                }
            }
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, TransportError> {
            match self.inbox.pop_front() {
                Some(m) => Ok(m),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !*self.closed.lock().unwrap()
        }
    }

    fn init_reply(id: u64, caps: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": caps,
            "serverInfo": {"name": "scripted", "version": "1"}
        }})
    }

    fn session(replies: Vec<Vec<Value>>) -> (Session, Arc<Mutex<Vec<String>>>, Arc<Mutex<bool>>) {
        let (t, sent, closed) = Scripted::new(replies);
        (Session::new("test", Box::new(t), &Config::default()), sent, closed)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Unopened.to_string(), "unopened");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_discover_lists_tools_and_closes() {
        let (s, sent, closed) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [
                {"name": "echo", "description": "Echoes input"}
            ]}})],
        ]);
        let listing = s.discover(Duration::from_secs(2)).await.unwrap();
        assert_eq!(listing.capabilities.len(), 1);
        assert_eq!(listing.capabilities[0].name, "echo");
        assert!(*closed.lock().unwrap());

        let sent = sent.lock().unwrap();
        assert!(sent[0].contains("\"method\":\"initialize\""));
        assert!(sent[0].contains("\"id\":1"));
        assert!(sent[1].contains("notifications/initialized"));
        assert!(sent[2].contains("\"method\":\"tools/list\""));
        assert!(sent[2].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_mismatched_ids_and_notifications_are_skipped() {
        let (s, _, _) = session(vec![vec![
            json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
            json!({"jsonrpc": "2.0", "id": 99, "result": {}}),
            json!("garbage"),
            init_reply(1, json!({})),
        ]]);
        let listing = s.discover(Duration::from_secs(2)).await.unwrap();
        assert!(listing.is_authoritative_empty());
        assert_eq!(listing.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_pagination_follows_cursor() {
        let (s, sent, _) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "a"}], "nextCursor": "p2"}})],
            vec![json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": [{"name": "b"}]}})],
        ]);
        let listing = s.discover(Duration::from_secs(2)).await.unwrap();
        let names: Vec<_> = listing.capabilities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(sent.lock().unwrap()[3].contains("\"cursor\":\"p2\""));
    }

    #[tokio::test]
    async fn test_secondary_kind_error_is_noted() {
        let (s, _, _) = session(vec![
            vec![init_reply(1, json!({"tools": {}, "prompts": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "t"}]}})],
            vec![json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -32601, "message": "no prompts"}})],
        ]);
        let listing = s.discover(Duration::from_secs(2)).await.unwrap();
        assert_eq!(listing.capabilities.len(), 1);
        assert!(listing.notes[0].contains("no prompts"));
    }

    #[tokio::test]
    async fn test_only_kind_error_fails() {
        let (s, _, closed) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32603, "message": "boom"}})],
        ]);
        let err = s.discover(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, McpError::Server { code: -32603, .. }));
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_initialize_fails() {
        let (s, _, _) = session(vec![vec![json!({"jsonrpc": "2.0", "id": 1, "result": {"hello": 1}})]]);
        let err = s.discover(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[tokio::test]
    async fn test_silent_server_times_out_and_closes() {
        let (s, _, closed) = session(vec![]);
        let started = Instant::now();
        let err = s.discover(Duration::from_millis(200)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_invoke_returns_raw_result() {
        let (s, sent, _) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "result": {"content": [{"type": "text", "text": "hi"}]}})],
        ]);
        let result = s
            .invoke("echo", Some(json!({"text": "hi"})), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert!(sent.lock().unwrap()[2].contains("\"name\":\"echo\""));
    }

    fn slow_requests(request_secs: u64) -> Config {
        let mut config = Config::default();
        config.timeouts.request_secs = request_secs;
        config
    }

    #[tokio::test]
    async fn test_stalled_initialize_is_a_setup_failure() {
        let (s, sent, _) = session(vec![]);
        let failure = s.invoke("echo", None, Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(failure, InvokeFailure::Setup(_)));
        assert!(failure.error().is_timeout());
        assert!(!sent.lock().unwrap().iter().any(|m| m.contains("tools/call")));
    }

    #[tokio::test]
    async fn test_unanswered_call_is_a_call_failure() {
        let (s, sent, closed) = session(vec![vec![init_reply(1, json!({"tools": {}}))]]);
        let failure = s.invoke("echo", None, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(failure, InvokeFailure::Call(_)));
        assert!(failure.error().is_timeout());
        assert!(sent.lock().unwrap()[2].contains("tools/call"));
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_call_error_is_a_call_failure() {
        let (s, _, _) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32000, "message": "tool crashed"}})],
        ]);
        let failure = s.invoke("echo", None, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(failure, InvokeFailure::Call(McpError::Server { code: -32000, .. })));
    }

    #[test]
    fn test_call_budget_uses_the_whole_deadline() {
        let (t, _, _) = Scripted::new(vec![]);
        let mut s = Session::new("test", Box::new(t), &slow_requests(1));
        assert_eq!(s.call_budget(), Duration::from_secs(1));

        s.start_budget(Duration::from_secs(60));
        assert!(s.call_budget() > Duration::from_secs(50));
        assert_eq!(s.request_budget(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_huge_budget_does_not_overflow() {
        let (s, _, _) = session(vec![vec![init_reply(1, json!({}))]]);
        let listing = s.discover(Duration::MAX).await.unwrap();
        assert!(listing.is_authoritative_empty());
    }

    #[tokio::test]
    async fn test_listing_reads_only_its_own_key() {
        let (s, _, _) = session(vec![
            vec![init_reply(1, json!({"tools": {}}))],
            vec![json!({"jsonrpc": "2.0", "id": 2, "result": {
                "tools": [{"name": "t"}],
                "prompts": [{"name": "stray"}],
                "resources": "not a list"
            }})],
        ]);
        let listing = s.discover(Duration::from_secs(2)).await.unwrap();
        let names: Vec<_> = listing.capabilities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["t"]);
    }

    #[tokio::test]
    async fn test_list_before_initialize_is_invalid() {
        let (mut s, _, _) = session(vec![]);
        let err = s.list_all().await.unwrap_err();
        assert!(matches!(err, McpError::InvalidState { .. }));
    }
}
