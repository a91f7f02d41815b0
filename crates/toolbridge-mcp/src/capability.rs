//! Normalized capability records and call outcomes.
//!
//! Everything that leaves this crate is expressed with these types,
//! regardless of which transport or strategy produced it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::McpError;
use crate::protocol::{PromptArgument, PromptDefinition, ResourceDefinition, ToolDefinition};

/// What sort of capability a descriptor names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt {
        #[serde(default)]
        arguments: Vec<PromptArgument>,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl CapabilityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Prompt { .. } => "prompt",
            Self::Resource { .. } => "resource",
        }
    }
}

/// Which capability family a health probe expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityFamily {
    Tools,
    Prompts,
    Resources,
}

impl std::str::FromStr for CapabilityFamily {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tools" | "tool" => Ok(Self::Tools),
            "prompts" | "prompt" => Ok(Self::Prompts),
            "resources" | "resource" => Ok(Self::Resources),
            other => Err(McpError::protocol(format!("unknown capability family '{}'", other))),
        }
    }
}

/// One capability a remote server offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
    #[serde(flatten)]
    pub kind: CapabilityKind,
}

fn default_schema() -> Value {
    json!({"type": "object"})
}

impl CapabilityDescriptor {
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: default_schema(),
            kind: CapabilityKind::Tool,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build a tool descriptor from any JSON object with a string `name`.
    ///
    /// Accepts the schema under `inputSchema`, `input_schema` or `parameters`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input_schema = ["inputSchema", "input_schema", "parameters"]
            .iter()
            .find_map(|k| value.get(*k).filter(|v| v.is_object()).cloned())
            .unwrap_or_else(default_schema);
        Some(Self {
            name: name.to_string(),
            description,
            input_schema,
            kind: CapabilityKind::Tool,
        })
    }
}

impl From<ToolDefinition> for CapabilityDescriptor {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool
                .input_schema
                .filter(|s| s.is_object())
                .unwrap_or_else(default_schema),
            kind: CapabilityKind::Tool,
        }
    }
}

impl From<PromptDefinition> for CapabilityDescriptor {
    fn from(prompt: PromptDefinition) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for arg in &prompt.arguments {
            properties.insert(
                arg.name.clone(),
                json!({
                    "type": "string",
                    "description": arg.description.clone().unwrap_or_default(),
                }),
            );
            if arg.required {
                required.push(Value::String(arg.name.clone()));
            }
        }
        Self {
            name: prompt.name,
            description: prompt.description.unwrap_or_default(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
            kind: CapabilityKind::Prompt {
                arguments: prompt.arguments,
            },
        }
    }
}

impl From<ResourceDefinition> for CapabilityDescriptor {
    fn from(resource: ResourceDefinition) -> Self {
        Self {
            name: resource.name.unwrap_or_else(|| resource.uri.clone()),
            description: resource.description.unwrap_or_default(),
            input_schema: default_schema(),
            kind: CapabilityKind::Resource {
                uri: resource.uri,
                mime_type: resource.mime_type,
            },
        }
    }
}

/// Drop later descriptors whose name was already seen.
pub fn dedup_by_name(capabilities: Vec<CapabilityDescriptor>) -> Vec<CapabilityDescriptor> {
    let mut seen = HashSet::new();
    capabilities
        .into_iter()
        .filter(|c| seen.insert(c.name.clone()))
        .collect()
}

/// Which path produced a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    Standard,
    FallbackPost,
    FallbackGet,
    FallbackStream,
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::FallbackPost => "fallback-post",
            Self::FallbackGet => "fallback-get",
            Self::FallbackStream => "fallback-stream",
        }
    }
}

impl std::fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one discovery call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub success: bool,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub strategy_used: Option<DiscoveryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl DiscoveryResult {
    pub fn found(
        strategy: DiscoveryStrategy,
        capabilities: Vec<CapabilityDescriptor>,
        diagnostic: Option<String>,
    ) -> Self {
        Self {
            success: true,
            capabilities: dedup_by_name(capabilities),
            strategy_used: Some(strategy),
            diagnostic,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            capabilities: Vec::new(),
            strategy_used: None,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Structured failure attached to an invocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl From<&McpError> for ErrorDetail {
    fn from(e: &McpError) -> Self {
        let code = match e {
            McpError::Server { code, .. } => Some(*code),
            McpError::Transport(crate::error::TransportError::Http { status, .. }) => {
                Some(i64::from(*status))
            }
            _ => None,
        };
        Self {
            category: e.category().to_string(),
            message: e.to_string(),
            code,
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl InvocationResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// The tool ran but reported an error; its payload is kept.
    pub fn tool_error(payload: Value, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Some(payload),
            error: Some(ErrorDetail {
                category: "tool".to_string(),
                message: message.into(),
                code: None,
            }),
        }
    }

    pub fn from_error(e: &McpError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(ErrorDetail::from(e)),
        }
    }
}

/// Outcome of one health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl HealthReport {
    pub fn healthy(detail: Option<String>, elapsed_ms: u64) -> Self {
        Self {
            healthy: true,
            detail,
            checked_at: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn unhealthy(detail: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
            elapsed_ms,
        }
    }
}
