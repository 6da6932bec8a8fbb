//! Typed remote commands
//!
//! Rollout steps are expressed as [`RemoteCommand`] values instead of
//! free-form shell text. The SSH adapter renders them into a `set -eu`
//! script; the fake host interprets them directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and as whom to open a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    /// Private key used for authentication.
    pub identity_file: PathBuf,
}

impl RemoteTarget {
    /// `user@host` destination string.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Everything needed to start the service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLaunch {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub restart_policy: String,
    pub env_file: String,
}

/// A single step executed on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum RemoteCommand {
    /// Log the host's container engine into the registry.
    RegistryLogin {
        region: String,
        registry_host: String,
    },

    /// Pull an image.
    PullImage { image: String },

    /// Fail if a container other than `owner` publishes `port`.
    EnsurePortFree { port: u16, owner: String },

    /// Stop and remove a container by name if it exists.
    RemoveContainer { name: String },

    /// Start a detached container.
    RunContainer(ContainerLaunch),
}

impl RemoteCommand {
    /// Render as one POSIX shell line.
    pub fn to_shell(&self) -> String {
        match self {
            RemoteCommand::RegistryLogin {
                region,
                registry_host,
            } => format!(
                "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
                shell_quote(region),
                shell_quote(registry_host)
            ),
            RemoteCommand::PullImage { image } => format!("docker pull {}", shell_quote(image)),
            RemoteCommand::EnsurePortFree { port, owner } => format!(
                "for n in $(docker ps --filter publish={port} --format '{{{{.Names}}}}'); do \
                 if [ \"$n\" != {owner} ]; then \
                 echo \"Bind for 0.0.0.0:{port} failed: port is already allocated by container $n\" >&2; \
                 exit 1; fi; done",
                owner = shell_quote(owner)
            ),
            RemoteCommand::RemoveContainer { name } => {
                let n = shell_quote(name);
                format!(
                    "if docker container inspect {n} >/dev/null 2>&1; then docker rm -f {n} >/dev/null; fi"
                )
            }
            RemoteCommand::RunContainer(launch) => format!(
                "docker run -d --name {} --restart {} -p {}:{} --env-file {} {}",
                shell_quote(&launch.name),
                shell_quote(&launch.restart_policy),
                launch.host_port,
                launch.container_port,
                shell_quote(&launch.env_file),
                shell_quote(&launch.image)
            ),
        }
    }

    /// Short label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            RemoteCommand::RegistryLogin { .. } => "registry_login",
            RemoteCommand::PullImage { .. } => "pull_image",
            RemoteCommand::EnsurePortFree { .. } => "ensure_port_free",
            RemoteCommand::RemoveContainer { .. } => "remove_container",
            RemoteCommand::RunContainer(_) => "run_container",
        }
    }
}

/// Render commands as a script that aborts on the first failing line.
///
/// `pipefail` is not POSIX, so the script asks for it only where supported;
/// a failed `get-login-password` would otherwise be masked by `docker login`.
pub fn render_script(commands: &[RemoteCommand]) -> String {
    let mut script = String::from("set -eu\n(set -o pipefail) 2>/dev/null && set -o pipefail\n");
    for command in commands {
        script.push_str(&command.to_shell());
        script.push('\n');
    }
    script
}

/// Single-quote a value for safe use in shell commands.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
