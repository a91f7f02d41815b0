//! Lightweight liveness probes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::json;
use tracing::debug;

use toolbridge_core::Config;

use crate::capability::{CapabilityFamily, HealthReport};
use crate::client::Session;
use crate::endpoint::{EndpointDescriptor, TransportKind};
use crate::error::{McpError, TransportError};
use crate::frame::{decode_body, scan_body, Framing};
use crate::protocol::{methods, JsonRpcMessage, JsonRpcRequest, ServerCapabilities};
use crate::transport::{
    self, apply_headers, check_status, content_type, http_client, parse_url, read_body,
    ACCEPT_JSON_OR_STREAM,
};

/// Checks whether endpoints answer, without listing anything.
#[derive(Clone)]
pub struct HealthProber {
    config: Arc<Config>,
}

impl HealthProber {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Probe one endpoint. Failures become unhealthy reports.
    pub async fn probe(
        &self,
        endpoint: &EndpointDescriptor,
        expected: Option<CapabilityFamily>,
    ) -> HealthReport {
        let started = Instant::now();
        let budget = endpoint.budget(self.config.timeouts.health());

        let outcome = match endpoint.kind {
            TransportKind::RequestResponse => {
                tokio::time::timeout(budget, self.synthetic_list(endpoint))
                    .await
                    .unwrap_or_else(|_| Err(McpError::timeout("health probe", budget)))
            }
            _ => self.handshake(endpoint, expected, budget).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let report = match outcome {
            Ok(detail) => HealthReport::healthy(Some(detail), elapsed_ms),
            Err(e) => HealthReport::unhealthy(e.to_string(), elapsed_ms),
        };
        debug!(
            server = %endpoint.locator,
            healthy = report.healthy,
            elapsed_ms = elapsed_ms,
            "Health probe finished"
        );
        report
    }

    async fn handshake(
        &self,
        endpoint: &EndpointDescriptor,
        expected: Option<CapabilityFamily>,
        budget: Duration,
    ) -> Result<String, McpError> {
        let transport = transport::connect(endpoint, &self.config)?;
        let caps = Session::new(endpoint.locator.clone(), transport, &self.config)
            .handshake(budget)
            .await?;

        if let Some(family) = expected {
            if !advertises(&caps, family) {
                return Err(McpError::NotFound(format!(
                    "server does not advertise {:?}",
                    family
                )));
            }
        }
        Ok(describe(&caps))
    }

    /// One bare `tools/list` POST; any well-formed answer counts.
    async fn synthetic_list(&self, endpoint: &EndpointDescriptor) -> Result<String, McpError> {
        let url = parse_url(&endpoint.locator)?;
        let body = JsonRpcRequest::new(1, methods::TOOLS_LIST, Some(json!({}))).encode()?;
        let request = apply_headers(http_client()?.post(url), &endpoint.headers)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_STREAM)
            .body(body);
        let response = request.send().await.map_err(TransportError::from)?;
        let response = check_status(response).await?;
        let ct = content_type(&response);
        let text = read_body(response, self.config.discovery.max_body_bytes).await?;

        let units: Vec<String> = match Framing::detect(ct.as_deref()) {
            Some(framing) => decode_body(&text, framing).into_iter().map(|e| e.data).collect(),
            None => vec![text.clone()],
        };
        for unit in &units {
            if let Ok(message) = JsonRpcMessage::decode(unit) {
                if message.answers(1) {
                    message.into_result()?;
                    return Ok("tools/list answered".to_string());
                }
            }
        }

        match scan_body(&text, ct.as_deref()) {
            Some(caps) => Ok(format!("{} capabilities listed", caps.len())),
            None => Err(McpError::protocol("unrecognized response to tools/list")),
        }
    }
}

fn advertises(caps: &ServerCapabilities, family: CapabilityFamily) -> bool {
    match family {
        CapabilityFamily::Tools => caps.supports_tools(),
        CapabilityFamily::Prompts => caps.supports_prompts(),
        CapabilityFamily::Resources => caps.supports_resources(),
    }
}

fn describe(caps: &ServerCapabilities) -> String {
    let mut kinds = Vec::new();
    if caps.supports_tools() {
        kinds.push("tools");
    }
    if caps.supports_prompts() {
        kinds.push("prompts");
    }
    if caps.supports_resources() {
        kinds.push("resources");
    }
    if kinds.is_empty() {
        "initialized; no capabilities advertised".to_string()
    } else {
        format!("initialized; advertises {}", kinds.join(", "))
    }
}
