//! Entry points for the marketplace backend.
//!
//! The string-based methods take the transport label as stored with a
//! server listing; the descriptor-based ones accept headers, environment and
//! timeout overrides. Only an unrecognised transport label is an `Err`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use toolbridge_core::Config;

use crate::capability::{CapabilityFamily, DiscoveryResult, HealthReport, InvocationResult};
use crate::discovery::Discoverer;
use crate::endpoint::{EndpointDescriptor, TransportKind};
use crate::error::McpError;
use crate::health::HealthProber;

/// Keys accepted for the locator in a probe configuration map.
const LOCATOR_KEYS: [&str; 4] = ["url", "command", "locator", "endpoint"];

/// Facade over discovery, invocation and health probing.
#[derive(Clone)]
pub struct Bridge {
    config: Arc<Config>,
    discoverer: Discoverer,
    prober: HealthProber,
}

impl Bridge {
    pub fn new(config: Config) -> Self {
        Self::with_shared_config(Arc::new(config))
    }

    pub fn with_shared_config(config: Arc<Config>) -> Self {
        Self {
            discoverer: Discoverer::new(config.clone()),
            prober: HealthProber::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn discover_capabilities(
        &self,
        locator: &str,
        transport_label: &str,
    ) -> Result<DiscoveryResult, McpError> {
        let endpoint = EndpointDescriptor::parse(locator, transport_label)?;
        Ok(self.discover(&endpoint).await)
    }

    /// `arguments` of `null` sends no arguments at all.
    pub async fn invoke_capability(
        &self,
        locator: &str,
        transport_label: &str,
        name: &str,
        arguments: Value,
    ) -> Result<InvocationResult, McpError> {
        let endpoint = EndpointDescriptor::parse(locator, transport_label)?;
        let arguments = (!arguments.is_null()).then_some(arguments);
        Ok(self.invoke(&endpoint, name, arguments).await)
    }

    /// Probe a server described by a loose configuration map.
    ///
    /// Recognised keys: `url`, `command`, `locator` or `endpoint` for the
    /// locator; `headers` and `env` objects; `timeout_secs`; and `expect`
    /// naming `tools`, `prompts` or `resources`.
    pub async fn probe_health(
        &self,
        transport_label: &str,
        config: &HashMap<String, Value>,
    ) -> Result<HealthReport, McpError> {
        let kind = TransportKind::from_label(transport_label)?;
        match endpoint_from_map(kind, config) {
            Ok((endpoint, expected)) => Ok(self.probe(&endpoint, expected).await),
            Err(reason) => Ok(HealthReport::unhealthy(reason, 0)),
        }
    }

    pub async fn discover(&self, endpoint: &EndpointDescriptor) -> DiscoveryResult {
        self.discoverer.discover(endpoint).await
    }

    pub async fn invoke(
        &self,
        endpoint: &EndpointDescriptor,
        name: &str,
        arguments: Option<Value>,
    ) -> InvocationResult {
        self.discoverer.invoke(endpoint, name, arguments).await
    }

    pub async fn probe(
        &self,
        endpoint: &EndpointDescriptor,
        expected: Option<CapabilityFamily>,
    ) -> HealthReport {
        self.prober.probe(endpoint, expected).await
    }
}

fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return HashMap::new();
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

fn endpoint_from_map(
    kind: TransportKind,
    config: &HashMap<String, Value>,
) -> Result<(EndpointDescriptor, Option<CapabilityFamily>), String> {
    let locator = LOCATOR_KEYS
        .iter()
        .find_map(|k| config.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| "no url or command configured".to_string())?;

    let mut endpoint = EndpointDescriptor::new(locator, kind)
        .with_headers(string_map(config.get("headers")))
        .with_headers(string_map(config.get("env")));

    if let Some(secs) = config.get("timeout_secs").and_then(Value::as_u64) {
        endpoint = endpoint.with_timeout(Duration::from_secs(secs));
    }

    let expected = match config.get("expect").and_then(Value::as_str) {
        Some(label) => Some(label.parse::<CapabilityFamily>().map_err(|e| e.to_string())?),
        None => None,
    };

    Ok((endpoint, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_endpoint_from_map() {
        let (endpoint, expected) = endpoint_from_map(
            TransportKind::RequestResponse,
            &map(json!({
                "url": " https://example.com/mcp ",
                "headers": {"Authorization": "Bearer x", "X-Retry": 3},
                "timeout_secs": 2,
                "expect": "prompts"
            })),
        )
        .unwrap();
        assert_eq!(endpoint.locator, "https://example.com/mcp");
        assert_eq!(endpoint.headers["X-Retry"], "3");
        assert_eq!(endpoint.timeout, Some(Duration::from_secs(2)));
        assert_eq!(expected, Some(CapabilityFamily::Prompts));
    }

    #[test]
    fn test_env_map_for_commands() {
        let (endpoint, _) = endpoint_from_map(
            TransportKind::Subprocess,
            &map(json!({"command": "server --stdio", "env": {"TOKEN": "t"}})),
        )
        .unwrap();
        assert_eq!(endpoint.headers["TOKEN"], "t");
    }

    #[tokio::test]
    async fn test_missing_locator_is_unhealthy() {
        let bridge = Bridge::new(Config::default());
        let report = bridge.probe_health("http", &HashMap::new()).await.unwrap();
        assert!(!report.healthy);
        assert_eq!(report.detail.as_deref(), Some("no url or command configured"));
    }

    #[tokio::test]
    async fn test_unknown_label_is_the_only_error() {
        let bridge = Bridge::new(Config::default());
        assert!(matches!(
            bridge.discover_capabilities("x", "pigeon").await,
            Err(McpError::UnknownTransport(_))
        ));
        assert!(bridge
            .invoke_capability("x", "pigeon", "t", Value::Null)
            .await
            .is_err());
        assert!(bridge.probe_health("pigeon", &HashMap::new()).await.is_err());
    }
}
