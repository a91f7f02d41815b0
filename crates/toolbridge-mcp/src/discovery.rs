//! Discovery orchestration.
//!
//! The standard protocol session is tried first. For HTTP endpoints that
//! fail it, or that list nothing, an ordered cascade of fallback strategies
//! probes the server for anything capability-shaped. Every outcome is
//! reported as a value; nothing here returns an error.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use toolbridge_core::Config;

use crate::capability::{CapabilityDescriptor, DiscoveryResult, DiscoveryStrategy, InvocationResult};
use crate::client::{InvokeFailure, Session};
use crate::endpoint::EndpointDescriptor;
use crate::error::{McpError, TransportError};
use crate::frame::{collect_capabilities, decode_body, scan_body, Framing};
use crate::protocol::{methods, CallToolParams, CallToolResult, JsonRpcMessage, JsonRpcRequest};
use crate::transport::{
    self, apply_headers, check_status, content_type, http_client, parse_url, read_body,
    ACCEPT_JSON_OR_STREAM,
};

/// Fallback strategies, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// POST a bare `tools/list` envelope.
    Post,
    /// GET well-known listing paths.
    Get,
    /// GET the locator as an event stream.
    Stream,
}

impl FallbackStrategy {
    pub const ORDER: [FallbackStrategy; 3] = [Self::Post, Self::Get, Self::Stream];

    /// Strategy reported when this fallback succeeds with a plain body.
    pub fn strategy(&self) -> DiscoveryStrategy {
        match self {
            Self::Post => DiscoveryStrategy::FallbackPost,
            Self::Get => DiscoveryStrategy::FallbackGet,
            Self::Stream => DiscoveryStrategy::FallbackStream,
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy().as_str())
    }
}

fn join_path(base: &Url, path: &str) -> Url {
    if path.is_empty() {
        return base.clone();
    }
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url
}

async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, McpError> {
    let response = request.send().await.map_err(TransportError::from)?;
    Ok(check_status(response).await?)
}

/// Share of an HTTP discovery budget the standard session may use; the rest
/// is kept for the fallbacks.
const STANDARD_SHARE: f64 = 0.5;

fn diagnostic(lines: &[String]) -> Option<String> {
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Runs discovery and invocation against remote servers.
#[derive(Clone)]
pub struct Discoverer {
    config: Arc<Config>,
}

impl Discoverer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn session(&self, endpoint: &EndpointDescriptor) -> Result<Session, McpError> {
        let transport = transport::connect(endpoint, &self.config)?;
        Ok(Session::new(endpoint.locator.clone(), transport, &self.config))
    }

    /// Discover the capabilities of one endpoint.
    pub async fn discover(&self, endpoint: &EndpointDescriptor) -> DiscoveryResult {
        let started = Instant::now();
        let budget = endpoint.budget(self.config.timeouts.discovery());
        let deadline = started.checked_add(budget);
        let mut lines = Vec::new();

        // Without fallbacks to run, the standard session may use everything.
        let standard_budget = if endpoint.kind.is_http() {
            budget.mul_f64(STANDARD_SHARE)
        } else {
            budget
        };

        info!(server = %endpoint.locator, kind = %endpoint.kind, "Discovering capabilities");

        let standard = match self.session(endpoint) {
            Ok(session) => session.discover(standard_budget).await,
            Err(e) => Err(e),
        };

        let mut valid_empty = false;
        match standard {
            Ok(listing) if !listing.capabilities.is_empty() => {
                info!(
                    server = %endpoint.locator,
                    strategy = "standard",
                    count = listing.capabilities.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Discovery succeeded"
                );
                return DiscoveryResult::found(
                    DiscoveryStrategy::Standard,
                    listing.capabilities,
                    diagnostic(&listing.notes),
                );
            }
            Ok(listing) if listing.is_authoritative_empty() || !endpoint.kind.is_http() => {
                return DiscoveryResult::found(
                    DiscoveryStrategy::Standard,
                    Vec::new(),
                    diagnostic(&listing.notes),
                );
            }
            Ok(listing) => {
                valid_empty = true;
                lines.extend(listing.notes);
                lines.push("standard: listing returned no capabilities".to_string());
            }
            Err(e) => {
                debug!(server = %endpoint.locator, error = %e, "Standard discovery failed");
                lines.push(format!("standard: {}", e));
            }
        }

        if endpoint.kind.is_http() {
            for fallback in FallbackStrategy::ORDER {
                let remaining = match deadline {
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    None => budget.saturating_sub(started.elapsed()),
                };
                if remaining.is_zero() {
                    lines.push(format!("{}: skipped, discovery budget exhausted", fallback));
                    continue;
                }
                let attempt = self.config.timeouts.fallback_attempt().min(remaining);

                debug!(server = %endpoint.locator, strategy = %fallback, "Trying fallback");
                let outcome =
                    tokio::time::timeout(attempt, self.run_fallback(fallback, endpoint, attempt)).await;
                match outcome {
                    Ok(Ok((strategy, caps))) if !caps.is_empty() => {
                        info!(
                            server = %endpoint.locator,
                            strategy = %strategy,
                            count = caps.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Discovery succeeded"
                        );
                        return DiscoveryResult::found(strategy, caps, diagnostic(&lines));
                    }
                    Ok(Ok(_)) => lines.push(format!("{}: no capability-shaped data", fallback)),
                    Ok(Err(e)) => lines.push(format!("{}: {}", fallback, e)),
                    Err(_) => lines.push(format!(
                        "{}: timed out after {}ms",
                        fallback,
                        attempt.as_millis()
                    )),
                }
            }
        }

        if valid_empty {
            return DiscoveryResult::found(DiscoveryStrategy::Standard, Vec::new(), diagnostic(&lines));
        }

        warn!(
            server = %endpoint.locator,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "No capabilities found"
        );
        DiscoveryResult::failed(lines.join("\n"))
    }

    async fn run_fallback(
        &self,
        fallback: FallbackStrategy,
        endpoint: &EndpointDescriptor,
        attempt: Duration,
    ) -> Result<(DiscoveryStrategy, Vec<CapabilityDescriptor>), McpError> {
        let base = parse_url(&endpoint.locator)?;
        let client = http_client()?;
        let max_body = self.config.discovery.max_body_bytes;

        match fallback {
            FallbackStrategy::Post => {
                let body = JsonRpcRequest::new(1, methods::TOOLS_LIST, Some(json!({}))).encode()?;
                let request = apply_headers(client.post(base), &endpoint.headers)
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, ACCEPT_JSON_OR_STREAM)
                    .body(body);
                let response = send(request).await?;
                let ct = content_type(&response);
                match Framing::detect(ct.as_deref()) {
                    Some(framing) => {
                        let caps = collect_capabilities(Box::pin(response.bytes_stream()), framing, attempt).await?;
                        Ok((DiscoveryStrategy::FallbackStream, caps))
                    }
                    None => {
                        let body = read_body(response, max_body).await?;
                        Ok((fallback.strategy(), scan_body(&body, ct.as_deref()).unwrap_or_default()))
                    }
                }
            }
            FallbackStrategy::Get => {
                let mut misses = Vec::new();
                for path in &self.config.discovery.fallback_get_paths {
                    let url = join_path(&base, path);
                    match self.get_and_scan(&client, url.clone(), endpoint, attempt).await {
                        Ok(caps) if !caps.is_empty() => return Ok((fallback.strategy(), caps)),
                        Ok(_) => misses.push(format!("{} (no match)", url.path())),
                        Err(e) => misses.push(format!("{} ({})", url.path(), e)),
                    }
                }
                Err(McpError::NotFound(misses.join(", ")))
            }
            FallbackStrategy::Stream => {
                let request = apply_headers(client.get(base), &endpoint.headers)
                    .header(ACCEPT, "text/event-stream");
                let response = send(request).await?;
                let framing =
                    Framing::detect(content_type(&response).as_deref()).unwrap_or(Framing::EventStream);
                let caps = collect_capabilities(Box::pin(response.bytes_stream()), framing, attempt).await?;
                Ok((fallback.strategy(), caps))
            }
        }
    }

    async fn get_and_scan(
        &self,
        client: &reqwest::Client,
        url: Url,
        endpoint: &EndpointDescriptor,
        attempt: Duration,
    ) -> Result<Vec<CapabilityDescriptor>, McpError> {
        let request = apply_headers(client.get(url), &endpoint.headers)
            .header(ACCEPT, "application/json, application/x-ndjson;q=0.9, */*;q=0.5");
        let response = send(request).await?;
        let ct = content_type(&response);
        match Framing::detect(ct.as_deref()) {
            Some(framing) => collect_capabilities(Box::pin(response.bytes_stream()), framing, attempt).await,
            None => {
                let body = read_body(response, self.config.discovery.max_body_bytes).await?;
                Ok(scan_body(&body, ct.as_deref()).unwrap_or_default())
            }
        }
    }

    /// Call one tool on an endpoint.
    pub async fn invoke(
        &self,
        endpoint: &EndpointDescriptor,
        name: &str,
        arguments: Option<Value>,
    ) -> InvocationResult {
        let started = Instant::now();
        let budget = endpoint.budget(self.config.timeouts.invocation());

        info!(server = %endpoint.locator, tool = name, "Invoking capability");
        let standard = match self.session(endpoint) {
            Ok(session) => session.invoke(name, arguments.clone(), budget).await,
            Err(e) => Err(InvokeFailure::Setup(e)),
        };

        // Only a session that never sent `tools/call` may be retried directly.
        let outcome = match standard {
            Ok(result) => Ok(result),
            Err(InvokeFailure::Setup(e)) if endpoint.kind.is_http() => {
                let remaining = budget.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    Err(e)
                } else {
                    debug!(server = %endpoint.locator, error = %e, "Standard invocation failed, trying direct call");
                    let direct = tokio::time::timeout(
                        remaining,
                        self.direct_call(endpoint, name, arguments),
                    )
                    .await
                    .unwrap_or_else(|_| Err(McpError::timeout("direct call", remaining)));
                    match direct {
                        Ok(result) => Ok(result),
                        // A JSON-RPC answer says more than the failed handshake.
                        Err(direct @ McpError::Server { .. }) => Err(direct),
                        Err(direct) => {
                            debug!(error = %direct, "Direct call failed");
                            Err(e)
                        }
                    }
                }
            }
            Err(failure) => Err(failure.into_error()),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let result = interpret_call_result(result);
                info!(server = %endpoint.locator, tool = name, success = result.success, elapsed_ms = elapsed_ms, "Invocation finished");
                result
            }
            Err(e) => {
                warn!(server = %endpoint.locator, tool = name, error = %e, elapsed_ms = elapsed_ms, "Invocation failed");
                InvocationResult::from_error(&e)
            }
        }
    }

    async fn direct_call(
        &self,
        endpoint: &EndpointDescriptor,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, McpError> {
        let url = parse_url(&endpoint.locator)?;
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let body = JsonRpcRequest::new(1, methods::TOOLS_CALL, Some(params)).encode()?;
        let request = apply_headers(http_client()?.post(url), &endpoint.headers)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_STREAM)
            .body(body);
        let response = send(request).await?;
        let framing = Framing::detect(content_type(&response).as_deref());
        let text = read_body(response, self.config.discovery.max_body_bytes).await?;

        let candidates: Vec<String> = match framing {
            Some(framing) => decode_body(&text, framing).into_iter().map(|e| e.data).collect(),
            None => vec![text],
        };
        for candidate in candidates {
            if let Ok(message) = JsonRpcMessage::decode(&candidate) {
                if message.answers(1) {
                    return message.into_result();
                }
            }
        }
        Err(McpError::protocol("direct call returned no matching response"))
    }
}

/// Map a raw `tools/call` result onto an invocation result.
fn interpret_call_result(result: Value) -> InvocationResult {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    if !is_error {
        return InvocationResult::ok(result);
    }
    let message = serde_json::from_value::<CallToolResult>(result.clone())
        .ok()
        .and_then(|r| r.text())
        .unwrap_or_else(|| "tool reported an error".to_string());
    InvocationResult::tool_error(result, message)
}
