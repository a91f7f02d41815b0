//! Mock MCP server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdio and offers one `echo` tool.
//!
//! Usage:
//!   mock-mcp-server [--no-tools] [--hang] [--pid-file PATH] [--noisy] [--prompts]
//!
//! Options:
//!   --no-tools        Advertise no capabilities at all
//!   --hang            Read requests but never answer, and ignore EOF
//!   --pid-file PATH   Write the process id to PATH on startup
//!   --noisy           Send a notification and a stray response before each reply
//!   --prompts         Also advertise one prompt

use std::env;
use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

#[derive(Default)]
struct ServerConfig {
    no_tools: bool,
    hang: bool,
    pid_file: Option<String>,
    noisy: bool,
    prompts: bool,
}

impl ServerConfig {
    fn from_args() -> Self {
        let mut config = Self::default();
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-tools" => config.no_tools = true,
                "--hang" => config.hang = true,
                "--pid-file" => config.pid_file = args.next(),
                "--noisy" => config.noisy = true,
                "--prompts" => config.prompts = true,
                other => eprintln!("mock-mcp-server: ignoring unknown argument {}", other),
            }
        }
        config
    }
}

fn capabilities(config: &ServerConfig) -> Value {
    if config.no_tools {
        return json!({});
    }
    let mut caps = json!({"tools": {"listChanged": false}});
    if config.prompts {
        caps["prompts"] = json!({});
    }
    caps
}

fn handle(config: &ServerConfig, method: &str, params: &Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": capabilities(config),
            "serverInfo": {"name": "mock-mcp-server", "version": "0.1.0"}
        })),
        "tools/list" if !config.no_tools => Ok(json!({
            "tools": [{
                "name": "echo",
                "description": "Echoes input",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            }]
        })),
        "prompts/list" if config.prompts => Ok(json!({
            "prompts": [{
                "name": "greet",
                "description": "Greets someone",
                "arguments": [{"name": "who", "required": true}]
            }]
        })),
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            if name != "echo" {
                return Ok(json!({
                    "content": [{"type": "text", "text": format!("unknown tool: {}", name)}],
                    "isError": true
                }));
            }
            let text = params
                .pointer("/arguments/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!({"content": [{"type": "text", "text": text}]}))
        }
        other => Err((-32601, format!("Method not found: {}", other))),
    }
}

fn write_line(out: &mut impl Write, value: &Value) -> io::Result<()> {
    writeln!(out, "{}", value)?;
    out.flush()
}

fn main() -> io::Result<()> {
    let config = ServerConfig::from_args();

    if let Some(path) = &config.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // Notifications carry no id and get no answer.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        if config.hang {
            continue;
        }

        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        if config.noisy {
            write_line(
                &mut stdout,
                &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}}),
            )?;
            write_line(&mut stdout, &json!({"jsonrpc": "2.0", "id": 9999, "result": {}}))?;
            writeln!(stdout, "not json at all")?;
        }

        let response = match handle(&config, method, &params) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        };
        write_line(&mut stdout, &response)?;
    }

    // A hung server also ignores EOF on stdin and has to be signalled.
    if config.hang {
        loop {
            std::thread::sleep(std::time::Duration::from_secs(60));
        }
    }

    Ok(())
}
