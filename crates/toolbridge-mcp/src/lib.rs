//! # toolbridge-mcp
//!
//! Server communication layer for MCP-style capability discovery.
//!
//! This crate provides:
//! - Subprocess, HTTP, server-stream and WebSocket transports
//! - The standard `initialize` / `*/list` / `tools/call` client
//! - Fallback discovery for servers that do not follow the protocol
//! - Health probes
//!
//! Most callers only need [`Bridge`].

pub mod bridge;
pub mod capability;
pub mod client;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod health;
pub mod protocol;
pub mod transport;

pub use bridge::Bridge;
pub use capability::{
    CapabilityDescriptor, CapabilityFamily, CapabilityKind, DiscoveryResult, DiscoveryStrategy,
    ErrorDetail, HealthReport, InvocationResult,
};
pub use discovery::Discoverer;
pub use endpoint::{EndpointDescriptor, TransportKind};
pub use error::{McpError, TransportError};
pub use health::HealthProber;
