//! # toolbridge
//!
//! Command-line front end for capability discovery, tool invocation and
//! health probes against MCP-style servers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolbridge_core::error::format_error_with_suggestion;

mod commands;

/// Toolbridge - discover and call tools on remote MCP servers
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extra config file layered over the usual sources
    #[arg(long, global = true, value_name = "PATH", env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where a server lives and how to reach it.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// URL, or command line for subprocess servers
    #[arg(value_name = "LOCATOR")]
    pub locator: String,

    /// Transport label (stdio, http, sse, streamable-http, websocket, ...)
    #[arg(short, long, default_value = "stdio")]
    pub transport: String,

    /// Header for HTTP transports, or environment variable for subprocesses
    #[arg(short = 'H', long = "header", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub headers: Vec<(String, String)>,

    /// Overall deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the capabilities a server offers
    Discover {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool
    Invoke {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Tool name
        #[arg(value_name = "NAME")]
        name: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, value_name = "JSON")]
        args: Option<String>,
    },
    /// Check whether a server answers
    Health {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Require the server to advertise tools, prompts or resources
        #[arg(long, value_name = "FAMILY")]
        expect: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration and list every issue
    Validate,
    /// Print the user config file location
    Path,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = cli.config.as_deref();
    let outcome = match cli.command {
        Commands::Discover { endpoint, json } => {
            commands::discover::run(&endpoint, json, config).await
        }
        Commands::Invoke {
            endpoint,
            name,
            args,
        } => commands::invoke::run(&endpoint, &name, args.as_deref(), config).await,
        Commands::Health { endpoint, expect } => {
            commands::health::run(&endpoint, expect.as_deref(), config).await
        }
        Commands::Config { action } => commands::config::handle(action, config),
        Commands::Version => {
            println!("toolbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<toolbridge_core::Error>() {
                Some(core) => eprintln!("Error: {}", format_error_with_suggestion(core)),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::from(2)
        }
    }
}
