//! Error types for cloud-bridge

use thiserror::Error;

/// Errors raised while talking to an external system
#[derive(Error, Debug)]
pub enum CloudError {
    /// Executable not found in PATH
    #[error("{0} is not installed or not in PATH")]
    ToolNotFound(String),

    /// External command exited with a non-zero status
    #[error("{tool} exited with code {code}: {stderr}")]
    CommandFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// Provider answered with something we could not interpret
    #[error("unexpected {tool} output: {message}")]
    UnexpectedOutput { tool: String, message: String },

    /// Remote host could not be reached
    #[error("host {host} is unreachable: {message}")]
    Unreachable { host: String, message: String },

    /// Container name or port already taken on the target host
    #[error("container conflict: {0}")]
    Conflict(String),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Build a `CommandFailed` from captured process output.
    pub fn command_failed(tool: &str, code: i32, stderr: &[u8]) -> Self {
        CloudError::CommandFailed {
            tool: tool.to_string(),
            code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}
