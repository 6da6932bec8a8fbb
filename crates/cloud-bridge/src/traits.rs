//! Port definitions for every external system the deploy pipeline touches
//!
//! - `IdentityProvider`: resolves the caller's cloud account
//! - `StackProvider`: describe/create/update of an infrastructure stack
//! - `ContainerRegistry` / `ImageBuilder`: image repository and local engine
//! - `RemoteConnector` / `RemoteSession`: commands on the target host
//! - `ObjectStore`: bucket listing, upload and delete
//! - `KeyGenerator`: SSH keypair generation
//!
//! All traits are async and backend-agnostic. CLI-backed implementations
//! live in `aws`, `docker` and `ssh`; in-memory fakes in `fakes`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::remote::{RemoteCommand, RemoteTarget};
use crate::Result;

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

/// Identity reported by the provider for the active credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Account identifier (may be empty when the provider answers oddly).
    pub account: String,
    /// Caller ARN.
    pub arn: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Ask the provider who the active credentials belong to.
    async fn caller_identity(&self) -> Result<CallerIdentity>;
}

// ---------------------------------------------------------------------------
// StackProvider
// ---------------------------------------------------------------------------

/// Provider-reported stack status (e.g. `CREATE_COMPLETE`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackStatus(String);

impl StackStatus {
    pub fn new(status: impl Into<String>) -> Self {
        StackStatus(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An operation is still running.
    pub fn is_in_progress(&self) -> bool {
        self.0.ends_with("_IN_PROGRESS")
    }

    /// Terminal state that means the last operation did not apply.
    pub fn is_failed(&self) -> bool {
        self.0.ends_with("_FAILED") || self.0.ends_with("ROLLBACK_COMPLETE")
    }

    /// Terminal state with the last operation applied.
    pub fn is_complete(&self) -> bool {
        self.0.ends_with("_COMPLETE") && !self.is_failed()
    }

    /// A first create that rolled back; such a stack can only be deleted.
    pub fn is_dead_create(&self) -> bool {
        self.0 == "ROLLBACK_COMPLETE"
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named stack output as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

/// Snapshot of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    /// Provider diagnostic for the current status, if any.
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
}

/// Named parameter passed to the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParameter {
    pub key: String,
    pub value: String,
}

impl StackParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        StackParameter {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Create or update request.
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub name: String,
    /// Local template file.
    pub template: PathBuf,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
}

/// Outcome of an update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackChange {
    /// The provider accepted the change and is converging.
    Started,
    /// Template and parameters already match; nothing to do.
    NoChanges,
}

#[async_trait]
pub trait StackProvider: Send + Sync {
    /// Describe a stack. `Ok(None)` when it does not exist.
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>>;

    /// Start creating a new stack. Returns once the request is accepted.
    async fn create_stack(&self, request: &StackRequest) -> Result<()>;

    /// Start updating an existing stack.
    async fn update_stack(&self, request: &StackRequest) -> Result<StackChange>;
}

// ---------------------------------------------------------------------------
// ContainerRegistry / ImageBuilder
// ---------------------------------------------------------------------------

/// Whether `ensure_repository` had to create the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Existing,
    Created,
}

#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Make sure the repository exists, creating it on demand.
    async fn ensure_repository(&self, name: &str) -> Result<RepositoryState>;

    /// Short-lived registry password for `docker login`.
    async fn login_password(&self) -> Result<String>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build an image from `context` and tag it `tag`.
    async fn build(&self, context: &Path, tag: &str) -> Result<()>;

    /// Add `target` as another name for `source`.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Authenticate against `registry_host`.
    async fn login(&self, registry_host: &str, username: &str, password: &str) -> Result<()>;

    /// Push a fully-qualified image reference.
    async fn push(&self, image: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// RemoteConnector / RemoteSession
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Open a session and verify the host answers.
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Host this session talks to.
    fn host(&self) -> &str;

    /// Write `contents` to `remote_path` with permission bits `mode`.
    ///
    /// The file must never exist on the host with wider permissions.
    async fn upload(&self, contents: &[u8], remote_path: &str, mode: u32) -> Result<()>;

    /// Run commands in order, stopping at the first failure.
    async fn run(&self, commands: &[RemoteCommand]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Object listed in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in the bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<RemoteObject>>;

    /// Upload a local file under `key`.
    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<()>;

    /// Delete `key`. No-op if absent.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// KeyGenerator
// ---------------------------------------------------------------------------

/// Parameters for a new keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub algorithm: String,
    pub bits: u32,
    pub comment: String,
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Write a new keypair to `private_key` and `<private_key>.pub`.
    async fn generate(&self, private_key: &Path, spec: &KeySpec) -> Result<()>;

    /// Derive the public key text from an existing private key.
    async fn public_key_of(&self, private_key: &Path) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_status_classification() {
        assert!(StackStatus::new("CREATE_IN_PROGRESS").is_in_progress());
        assert!(StackStatus::new("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS").is_in_progress());
        assert!(StackStatus::new("CREATE_COMPLETE").is_complete());
        assert!(StackStatus::new("UPDATE_COMPLETE").is_complete());
        assert!(StackStatus::new("CREATE_FAILED").is_failed());
        assert!(StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_failed());
        assert!(!StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_complete());
        assert!(StackStatus::new("ROLLBACK_COMPLETE").is_dead_create());
        assert!(!StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_dead_create());
    }
}
