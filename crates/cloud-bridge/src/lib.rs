//! Cloud-Bridge: external system adapters for xkcd-deploy
//!
//! Every system the deploy pipeline talks to sits behind a trait in
//! [`traits`]. The production implementations drive the operator's own
//! command-line tools (`aws`, `docker`, `ssh`, `ssh-keygen`), so credentials
//! and profiles are whatever those tools already use. [`fakes`] provides
//! in-memory versions for tests.

pub mod aws;
pub mod docker;
pub mod error;
pub mod fakes;
pub mod process;
pub mod remote;
pub mod ssh;
pub mod traits;

pub use aws::{configured_default_region, AwsCli};
pub use docker::DockerCli;
pub use error::CloudError;
pub use process::{is_tool_available, run_tool, tool_version, ToolOutput};
pub use remote::{ContainerLaunch, RemoteCommand, RemoteTarget};
pub use ssh::{SshConnector, SshKeygen};
pub use traits::{
    CallerIdentity, ContainerRegistry, IdentityProvider, ImageBuilder, KeyGenerator, KeySpec,
    ObjectStore, RemoteConnector, RemoteObject, RemoteSession, RepositoryState, StackChange,
    StackDescription, StackOutput, StackParameter, StackProvider, StackRequest, StackStatus,
};

/// Result type for cloud-bridge operations
pub type Result<T> = std::result::Result<T, CloudError>;

/// Tools the pipeline shells out to, with the argument used to probe them.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("aws", "--version"),
    ("docker", "--version"),
    ("ssh", "-V"),
    ("ssh-keygen", "-?"),
];
