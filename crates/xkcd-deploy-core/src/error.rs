//! Pipeline error taxonomy.
//!
//! Every variant maps to a stable process exit code so operators (and
//! scripts wrapping the CLI) can tell which stage stopped the run.

use cloud_bridge::CloudError;
use std::path::PathBuf;

/// Deploy pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration file not found: {}", path.display())]
    ConfigFileMissing { path: PathBuf },

    #[error("configuration file {} is unreadable: {message}", path.display())]
    ConfigFileInvalid { path: PathBuf, message: String },

    #[error("missing required configuration keys: {}", keys.join(", "))]
    MissingConfigKeys { keys: Vec<String> },

    #[error("cloud identity could not be resolved: {0}")]
    Credential(String),

    #[error("key material at {}: {message}", path.display())]
    KeyMaterial { path: PathBuf, message: String },

    #[error("stack {stack} failed: {message}")]
    Infrastructure { stack: String, message: String },

    #[error("stack output '{output}' is missing (available: {})", available.join(", "))]
    OutputMissing {
        output: String,
        available: Vec<String>,
    },

    #[error("image {step} failed: {source}")]
    Artifact {
        step: &'static str,
        #[source]
        source: CloudError,
    },

    #[error("rollout {step} on {host} failed: {source}")]
    Rollout {
        step: &'static str,
        host: String,
        #[source]
        source: CloudError,
    },

    #[error("asset sync to {bucket} failed: {message}")]
    Sync { bucket: String, message: String },
}

impl DeployError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::ConfigFileMissing { .. } | DeployError::ConfigFileInvalid { .. } => 1,
            DeployError::MissingConfigKeys { .. } => 2,
            DeployError::Credential(_) => 3,
            DeployError::Infrastructure { .. } => 4,
            DeployError::OutputMissing { .. } => 5,
            DeployError::Artifact { .. } => 6,
            DeployError::Rollout { .. } => 7,
            DeployError::Sync { .. } => 8,
            DeployError::KeyMaterial { .. } => 9,
        }
    }

    /// Taxonomy name used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            DeployError::ConfigFileMissing { .. }
            | DeployError::ConfigFileInvalid { .. }
            | DeployError::MissingConfigKeys { .. } => "ConfigurationError",
            DeployError::Credential(_) => "CredentialError",
            DeployError::KeyMaterial { .. } => "KeyMaterialError",
            DeployError::Infrastructure { .. } => "InfrastructureError",
            DeployError::OutputMissing { .. } => "OutputMissingError",
            DeployError::Artifact { .. } => "ArtifactError",
            DeployError::Rollout { .. } => "RolloutError",
            DeployError::Sync { .. } => "SyncError",
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, DeployError>;
