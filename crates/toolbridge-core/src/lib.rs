//! # toolbridge-core
//!
//! Core types shared by the Toolbridge crates.
//!
//! This crate provides:
//! - Configuration system (timeouts, client identity, discovery tuning)
//! - Configuration validation
//! - Common error types

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
