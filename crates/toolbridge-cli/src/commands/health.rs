//! Health probe command.

use std::path::Path;

use toolbridge_mcp::CapabilityFamily;

use crate::EndpointArgs;

pub async fn run(
    args: &EndpointArgs,
    expect: Option<&str>,
    config: Option<&Path>,
) -> anyhow::Result<bool> {
    let expected = expect
        .map(str::parse::<CapabilityFamily>)
        .transpose()
        .map_err(toolbridge_core::Error::from)?;
    let bridge = super::bridge(config)?;
    let endpoint = super::endpoint(args)?;

    let report = bridge.probe(&endpoint, expected).await;
    let status = if report.healthy { "healthy" } else { "unhealthy" };
    println!(
        "{} {} ({}ms){}",
        endpoint.locator,
        status,
        report.elapsed_ms,
        report
            .detail
            .as_deref()
            .map(|d| format!(": {}", d))
            .unwrap_or_default()
    );
    Ok(report.healthy)
}
