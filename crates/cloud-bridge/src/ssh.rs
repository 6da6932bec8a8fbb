//! OpenSSH adapters: remote sessions over `ssh` and keypairs via `ssh-keygen`

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use crate::error::CloudError;
use crate::process::{args, run_checked, run_tool, ToolOutput};
use crate::remote::{render_script, shell_quote, RemoteCommand, RemoteTarget};
use crate::traits::{KeyGenerator, KeySpec, RemoteConnector, RemoteSession};
use crate::Result;

const SSH: &str = "ssh";
const SSH_KEYGEN: &str = "ssh-keygen";

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Opens [`SshSession`]s.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout_secs: u64,
}

impl Default for SshConnector {
    fn default() -> Self {
        SshConnector {
            connect_timeout_secs: 15,
        }
    }
}

impl SshConnector {
    pub fn new(connect_timeout_secs: u64) -> Self {
        SshConnector {
            connect_timeout_secs,
        }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let session = SshSession {
            target: target.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
        };
        session.probe().await?;
        info!(host = %target.host, "remote session established");
        Ok(Box::new(session))
    }
}

/// Non-interactive session to one host.
///
/// Every call is a separate `ssh` invocation; host keys of new hosts are
/// accepted on first contact and pinned afterwards.
#[derive(Debug, Clone)]
pub struct SshSession {
    target: RemoteTarget,
    connect_timeout_secs: u64,
}

impl SshSession {
    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        args([
            "-i".to_string(),
            self.target.identity_file.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            self.target.destination(),
            remote_command.to_string(),
        ])
    }

    async fn exec(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<ToolOutput> {
        let out = run_tool(SSH, &self.ssh_args(remote_command), stdin).await?;
        if out.passed() {
            return Ok(out);
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        if out.exit_code == SSH_CONNECTION_ERROR {
            return Err(CloudError::Unreachable {
                host: self.target.host.clone(),
                message: stderr,
            });
        }
        if is_conflict(&stderr) {
            return Err(CloudError::Conflict(stderr));
        }
        Err(CloudError::command_failed(SSH, out.exit_code, &out.stderr))
    }

    async fn probe(&self) -> Result<()> {
        self.exec("true", None).await.map(|_| ())
    }
}

/// Remote command that stores stdin at `remote_path` with `mode`.
///
/// The contents land in a fresh owner-only temp file next to the target and
/// are renamed over it, so an existing file with wider permissions never
/// receives them.
fn upload_command(remote_path: &str, mode: u32) -> String {
    let dir = Path::new(remote_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());
    let template = shell_quote(&format!("{}/.upload.XXXXXX", dir));
    let path = shell_quote(remote_path);
    format!(
        "set -eu; umask 077; tmp=$(mktemp {template}); trap 'rm -f \"$tmp\"' EXIT; \
         cat > \"$tmp\"; chmod {mode:o} \"$tmp\"; mv -f \"$tmp\" {path}"
    )
}

fn is_conflict(stderr: &str) -> bool {
    stderr.contains("is already in use by container") || stderr.contains("port is already allocated")
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.target.host
    }

    async fn upload(&self, contents: &[u8], remote_path: &str, mode: u32) -> Result<()> {
        debug!(host = %self.target.host, path = %remote_path, "uploading file");
        self.exec(&upload_command(remote_path, mode), Some(contents)).await?;
        Ok(())
    }

    async fn run(&self, commands: &[RemoteCommand]) -> Result<()> {
        let script = render_script(commands);
        debug!(host = %self.target.host, steps = commands.len(), "running remote script");
        self.exec("sh -s", Some(script.as_bytes())).await?;
        Ok(())
    }
}

/// `ssh-keygen` backed [`KeyGenerator`].
#[derive(Debug, Clone, Default)]
pub struct SshKeygen;

impl SshKeygen {
    pub fn new() -> Self {
        SshKeygen
    }
}

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, private_key: &Path, spec: &KeySpec) -> Result<()> {
        let argv = args([
            "-q".to_string(),
            "-t".to_string(),
            spec.algorithm.clone(),
            "-b".to_string(),
            spec.bits.to_string(),
            "-N".to_string(),
            String::new(),
            "-C".to_string(),
            spec.comment.clone(),
            "-f".to_string(),
            private_key.display().to_string(),
        ]);
        run_checked(SSH_KEYGEN, &argv, None).await?;
        Ok(())
    }

    async fn public_key_of(&self, private_key: &Path) -> Result<String> {
        let argv = args(["-y".to_string(), "-f".to_string(), private_key.display().to_string()]);
        let out = run_checked(SSH_KEYGEN, &argv, None).await?;
        Ok(out.stdout_text())
    }
}
