//! Configuration management commands.

use std::path::Path;

use toolbridge_core::config::IssueSeverity;
use toolbridge_core::{Config, Error};

use crate::ConfigAction;

fn load(path: Option<&Path>) -> Result<Config, Error> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(|e| Error::Config(e.to_string()))
}

pub fn handle(action: ConfigAction, path: Option<&Path>) -> anyhow::Result<bool> {
    match action {
        ConfigAction::Show => {
            let config = load(path)?;
            print!("{}", config.to_toml()?);
            Ok(true)
        }
        ConfigAction::Validate => {
            let config = load(path)?;
            let result = config.validate();
            for issue in &result.issues {
                let label = match issue.severity {
                    IssueSeverity::Error => "error",
                    IssueSeverity::Warning => "warning",
                };
                println!("{}: {}: {}", label, issue.field, issue.message);
            }
            if result.is_ok() {
                println!("Configuration is valid");
            }
            Ok(result.is_ok())
        }
        ConfigAction::Path => {
            println!("{}", Config::config_dir().join("config.toml").display());
            Ok(true)
        }
    }
}
