//! Capability discovery command.

use std::path::Path;

use toolbridge_mcp::{CapabilityKind, DiscoveryResult};

use crate::EndpointArgs;

pub async fn run(args: &EndpointArgs, json: bool, config: Option<&Path>) -> anyhow::Result<bool> {
    let bridge = super::bridge(config)?;
    let endpoint = super::endpoint(args)?;
    let result = bridge.discover(&endpoint).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render(&result));
    }
    Ok(result.success)
}

fn render(result: &DiscoveryResult) -> String {
    let mut out = String::new();
    match (&result.strategy_used, result.success) {
        (Some(strategy), true) => out.push_str(&format!(
            "Found {} capabilities ({})\n",
            result.capabilities.len(),
            strategy
        )),
        _ => out.push_str("Discovery failed\n"),
    }

    for cap in &result.capabilities {
        let marker = match &cap.kind {
            CapabilityKind::Resource { uri, .. } => format!("resource {}", uri),
            other => other.label().to_string(),
        };
        if cap.description.is_empty() {
            out.push_str(&format!("  {} [{}]\n", cap.name, marker));
        } else {
            out.push_str(&format!("  {} [{}] - {}\n", cap.name, marker, cap.description));
        }
    }

    if let Some(diagnostic) = &result.diagnostic {
        out.push_str("\nNotes:\n");
        for line in diagnostic.lines() {
            out.push_str(&format!("  {}\n", line));
        }
    }
    out
}
