//! External tool execution.
//!
//! Every adapter in this crate drives a command-line tool. This module is the
//! single place where processes are spawned, so every call returns an
//! explicit result and a non-zero exit is never mistaken for success.

use crate::error::CloudError;
use crate::Result;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Program that was run.
    pub tool: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: Vec<u8>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Whether the tool exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded lossily and trimmed.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Turn a failed invocation into `CommandFailed`.
    pub fn into_checked(self) -> Result<ToolOutput> {
        if self.passed() {
            Ok(self)
        } else {
            Err(CloudError::command_failed(
                &self.tool,
                self.exit_code,
                &self.stderr,
            ))
        }
    }
}

/// Run `program` with `args`, optionally feeding `stdin`, and capture output.
///
/// A missing executable is reported as `ToolNotFound`; a non-zero exit is
/// returned as data so callers can inspect stderr before deciding.
pub async fn run_tool(program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<ToolOutput> {
    let start = Instant::now();
    debug!(tool = %program, args = ?args, "spawning");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CloudError::ToolNotFound(program.to_string()),
            _ => CloudError::Io(e),
        })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // A tool that exits without draining stdin is judged by its exit code
            match pipe.write_all(input).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
            drop(pipe);
        }
    }

    let output = child.wait_with_output().await?;

    Ok(ToolOutput {
        tool: program.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a tool and fail on a non-zero exit.
pub async fn run_checked(program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<ToolOutput> {
    run_tool(program, args, stdin).await?.into_checked()
}

/// Check whether `program` can be spawned at all.
///
/// Some tools (ssh-keygen) have no version flag and exit non-zero on any
/// probe, so only a failed spawn counts as unavailable.
pub async fn is_tool_available(program: &str, probe_arg: &str) -> bool {
    run_tool(program, &[probe_arg.to_string()], None).await.is_ok()
}

/// First line a tool prints for `version_arg`, if it exits 0.
///
/// `ssh -V` writes to stderr, so stderr is consulted when stdout is empty.
pub async fn tool_version(program: &str, version_arg: &str) -> Option<String> {
    let out = run_tool(program, &[version_arg.to_string()], None).await.ok()?;
    if !out.passed() {
        return None;
    }
    let text = if out.stdout.is_empty() {
        String::from_utf8_lossy(&out.stderr).to_string()
    } else {
        String::from_utf8_lossy(&out.stdout).to_string()
    };
    text.lines().next().map(|l| l.trim().to_string())
}

/// Build an owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
