//! Subprocess transport: newline-delimited JSON over a child's stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::Transport;
use crate::endpoint::{split_command_line, TransportKind};
use crate::error::TransportError;

struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// Standard I/O transport for MCP servers.
///
/// The child is spawned on the first `send`, one per session, and is killed
/// and reaped by `close` (or by `kill_on_drop` if the transport is dropped).
pub struct StdioTransport {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    shutdown_grace: Duration,
    process: Option<ChildProcess>,
    closed: bool,
}

impl StdioTransport {
    /// Prepare a transport for `command_line`. Nothing is spawned yet.
    pub fn new(
        command_line: &str,
        env: HashMap<String, String>,
        shutdown_grace: Duration,
    ) -> Result<Self, TransportError> {
        let mut words = split_command_line(command_line)?;
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            env,
            shutdown_grace,
            process: None,
            closed: false,
        })
    }

    /// Get the process ID of the child process, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    fn spawn(&mut self) -> Result<&mut ChildProcess, TransportError> {
        if self.process.is_none() {
            debug!(command = %self.program, args = ?self.args, "Spawning MCP server process");

            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args)
                .envs(&self.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                // Unread stderr pipes can fill up and stall the server.
                .stderr(Stdio::null())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

            let stdin = child.stdin.take().ok_or_else(|| {
                TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdin"))
            })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdout"))
            })?;

            debug!(pid = ?child.id(), "MCP server process spawned");
            self.process = Some(ChildProcess {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            });
        }
        self.process.as_mut().ok_or(TransportError::NotConnected)
    }

    async fn write_line(stdin: &mut ChildStdin, message: &str) -> std::io::Result<()> {
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Subprocess
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }

        let process = self.spawn()?;
        let stdin = process.stdin.as_mut().ok_or(TransportError::NotConnected)?;

        debug!(message = message, "Sending message to MCP server");
        match Self::write_line(stdin, message).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                // A server that answers and exits right away closes stdin
                // first; its reply may still be waiting on stdout.
                match process.child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(%status, "MCP server exited before reading input");
                        Ok(())
                    }
                    _ => Err(TransportError::WriteError(e)),
                }
            }
            Err(e) => Err(TransportError::WriteError(e)),
        }
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        let process = self.process.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            let mut line = String::new();
            let bytes_read = process
                .stdout
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            let message = line.trim();
            if message.is_empty() {
                continue;
            }

            debug!(message = message, "Received message from MCP server");
            return Ok(message.to_string());
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        debug!(pid = ?process.child.id(), "Closing MCP server transport");
        // EOF on stdin is the polite shutdown request.
        drop(process.stdin.take());

        if let Ok(Some(status)) = process.child.try_wait() {
            debug!(%status, "MCP server already exited");
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = process.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(pid = pid, "Sending SIGTERM to MCP server");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        tokio::select! {
            status = process.child.wait() => {
                debug!(status = ?status, "MCP server exited gracefully");
            }
            _ = tokio::time::sleep(self.shutdown_grace) => {
                warn!("MCP server did not exit gracefully, killing");
                // kill() also waits, so the child is reaped when this returns.
                if let Err(e) = process.child.kill().await {
                    warn!(error = %e, "Failed to kill MCP server");
                }
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed && self.process.is_some()
    }
}
