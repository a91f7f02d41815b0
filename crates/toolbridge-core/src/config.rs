//! Configuration system for Toolbridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for Toolbridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deadlines for every suspension point
    pub timeouts: TimeoutsConfig,
    /// Identity announced to remote servers
    pub client: ClientConfig,
    /// Discovery tuning
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Single request/response round trip
    pub request_secs: u64,
    /// End-to-end discovery including every fallback
    pub discovery_secs: u64,
    /// One fallback attempt
    pub fallback_attempt_secs: u64,
    /// End-to-end tool invocation
    pub invocation_secs: u64,
    /// Health probe
    pub health_secs: u64,
    /// Wait for a session token on a server stream
    pub handshake_secs: u64,
    /// Grace period between SIGTERM and SIGKILL for subprocesses
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_secs: 15,
            discovery_secs: 45,
            fallback_attempt_secs: 10,
            invocation_secs: 120,
            health_secs: 5,
            handshake_secs: 3,
            shutdown_grace_ms: 1000,
        }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }

    pub fn fallback_attempt(&self) -> Duration {
        Duration::from_secs(self.fallback_attempt_secs)
    }

    pub fn invocation(&self) -> Duration {
        Duration::from_secs(self.invocation_secs)
    }

    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name sent in `initialize`
    pub name: String,
    /// Client version sent in `initialize`
    pub version: String,
    /// Protocol version requested from servers
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "2024-11-05".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Paths probed with GET when the standard handshake fails
    pub fallback_get_paths: Vec<String>,
    /// Upper bound on `nextCursor` pages followed per list call
    pub max_list_pages: usize,
    /// Largest response body read during fallback scans
    pub max_body_bytes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fallback_get_paths: vec![
                String::new(),
                "/tools".to_string(),
                "/api/tools".to_string(),
                "/mcp/tools".to_string(),
                "/tools/list".to_string(),
            ],
            max_list_pages: 16,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "timeouts.health_secs")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Build the layered figment: defaults, user file, project files, then env.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".toolbridge/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".toolbridge/config.local.toml"))
            .merge(Env::prefixed("TOOLBRIDGE_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load configuration, layering an explicit file over the usual sources.
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TOOLBRIDGE_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
        .map_err(|e| Error::Config(e.to_string()))?;

        let result = config.validate();
        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Validation(errors.join("\n  ")));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let t = &self.timeouts;

        let required = [
            ("timeouts.request_secs", t.request_secs),
            ("timeouts.discovery_secs", t.discovery_secs),
            ("timeouts.fallback_attempt_secs", t.fallback_attempt_secs),
            ("timeouts.invocation_secs", t.invocation_secs),
            ("timeouts.health_secs", t.health_secs),
            ("timeouts.handshake_secs", t.handshake_secs),
        ];
        for (field, value) in required {
            if value == 0 {
                result.add_error(field, "must be greater than 0");
            }
        }

        // Health checks run in sweeps and must not pile up behind discovery.
        if t.health_secs >= t.discovery_secs {
            result.add_error(
                "timeouts.health_secs",
                "must be shorter than timeouts.discovery_secs",
            );
        }

        if t.request_secs > t.discovery_secs {
            result.add_warning(
                "timeouts.request_secs",
                "longer than discovery_secs, the discovery budget will cut requests short",
            );
        }

        if t.discovery_secs > 600 || t.invocation_secs > 3600 {
            result.add_warning("timeouts", "very long timeouts keep remote calls open for minutes");
        }

        if self.client.name.trim().is_empty() {
            result.add_error("client.name", "client name cannot be empty");
        }

        if self.client.protocol_version.trim().is_empty() {
            result.add_error("client.protocol_version", "protocol version cannot be empty");
        }

        if self.discovery.max_list_pages == 0 {
            result.add_error("discovery.max_list_pages", "must be greater than 0");
        }

        if self.discovery.max_body_bytes < 1024 {
            result.add_error("discovery.max_body_bytes", "must be at least 1024 bytes");
        }

        for path in &self.discovery.fallback_get_paths {
            if !path.is_empty() && !path.starts_with('/') {
                result.add_error(
                    "discovery.fallback_get_paths",
                    format!("path '{}' must be empty or start with '/'", path),
                );
            }
        }

        result
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("toolbridge"))
            .unwrap_or_else(|| PathBuf::from("~/.config/toolbridge"))
    }
}
