//! CLI command implementations.

pub mod config;
pub mod discover;
pub mod health;
pub mod invoke;

use std::path::Path;
use std::time::Duration;

use toolbridge_core::Config;
use toolbridge_mcp::{Bridge, EndpointDescriptor};
use tracing::debug;

use crate::EndpointArgs;

/// Load the validated configuration and build a bridge around it.
pub fn bridge(config_path: Option<&Path>) -> anyhow::Result<Bridge> {
    let config = Config::load_validated(config_path)?;
    debug!(
        extra_file = ?config_path,
        discovery_secs = config.timeouts.discovery_secs,
        invocation_secs = config.timeouts.invocation_secs,
        "Configuration loaded"
    );
    Ok(Bridge::new(config))
}

/// Turn command-line endpoint arguments into a descriptor.
pub fn endpoint(args: &EndpointArgs) -> anyhow::Result<EndpointDescriptor> {
    let mut endpoint = EndpointDescriptor::parse(args.locator.trim(), &args.transport)
        .map_err(toolbridge_core::Error::from)?
        .with_headers(args.headers.iter().cloned().collect());
    if let Some(secs) = args.timeout {
        endpoint = endpoint.with_timeout(Duration::from_secs(secs));
    }
    debug!(
        locator = %endpoint.locator,
        kind = %endpoint.kind,
        headers = endpoint.headers.len(),
        timeout = ?endpoint.timeout,
        "Resolved endpoint"
    );
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(transport: &str) -> EndpointArgs {
        EndpointArgs {
            locator: " https://example.com/mcp ".to_string(),
            transport: transport.to_string(),
            headers: vec![("Authorization".to_string(), "Bearer t".to_string())],
            timeout: Some(3),
        }
    }

    #[test]
    fn test_endpoint_from_args() {
        let endpoint = endpoint(&args("HTTP")).unwrap();
        assert_eq!(endpoint.locator, "https://example.com/mcp");
        assert_eq!(endpoint.headers["Authorization"], "Bearer t");
        assert_eq!(endpoint.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_unknown_transport_carries_suggestion() {
        let err = endpoint(&args("pigeon")).unwrap_err();
        let core = err.downcast_ref::<toolbridge_core::Error>().unwrap();
        assert!(core.recovery_suggestion().is_some());
    }
}
