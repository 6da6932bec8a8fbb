//! SSH key material for the remote host.
//!
//! The keypair is the trust anchor between this machine and the instance
//! (its public half ends up in the host's `authorized_keys` through the
//! stack). It is generated once and then reused forever: an existing private
//! key is never regenerated, validated or overwritten.

use std::path::{Path, PathBuf};

use cloud_bridge::{KeyGenerator, KeySpec};
use tracing::{info, warn};

use crate::error::{DeployError, Result};

pub const KEY_ALGORITHM: &str = "rsa";
pub const KEY_BITS: u32 = 4096;
pub const KEY_LABEL: &str = "xkcd-bot-deploy";

/// A keypair on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub private_key: PathBuf,
    pub public_key_path: PathBuf,
    /// OpenSSH public key line.
    pub public_key: String,
    /// Whether this run created the pair.
    pub generated: bool,
}

/// Ensures a reusable keypair exists.
pub struct KeyMaterialProvisioner;

impl KeyMaterialProvisioner {
    /// Fixed generation parameters.
    pub fn key_spec() -> KeySpec {
        KeySpec {
            algorithm: KEY_ALGORITHM.to_string(),
            bits: KEY_BITS,
            comment: KEY_LABEL.to_string(),
        }
    }

    /// Return the keypair at `path`, generating it only if absent.
    pub async fn ensure_key_pair(generator: &dyn KeyGenerator, path: &Path) -> Result<KeyMaterial> {
        let fail = |message: String| DeployError::KeyMaterial {
            path: path.to_path_buf(),
            message,
        };
        let public_key_path = public_path(path);

        if path.is_dir() {
            return Err(fail("path is a directory".to_string()));
        }

        if path.exists() {
            info!(path = %path.display(), "reusing existing key");
            let public_key = if public_key_path.is_file() {
                tokio::fs::read_to_string(&public_key_path)
                    .await
                    .map_err(|e| fail(e.to_string()))?
            } else {
                warn!(path = %public_key_path.display(), "public key missing; deriving it");
                let derived = generator
                    .public_key_of(path)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                write_new(&public_key_path, format!("{}\n", derived.trim()).as_bytes())
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                set_mode(&public_key_path, 0o644)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                derived
            };
            return Ok(KeyMaterial {
                private_key: path.to_path_buf(),
                public_key_path,
                public_key: public_key.trim().to_string(),
                generated: false,
            });
        }

        if public_key_path.exists() {
            return Err(fail(format!(
                "{} exists without its private key; refusing to replace it",
                public_key_path.display()
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                create_private_dir(parent)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
            }
        }

        info!(path = %path.display(), bits = KEY_BITS, "generating keypair");
        generator
            .generate(path, &Self::key_spec())
            .await
            .map_err(|e| fail(e.to_string()))?;

        set_mode(path, 0o600).await.map_err(|e| fail(e.to_string()))?;
        set_mode(&public_key_path, 0o644)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let public_key = tokio::fs::read_to_string(&public_key_path)
            .await
            .map_err(|e| fail(e.to_string()))?;

        Ok(KeyMaterial {
            private_key: path.to_path_buf(),
            public_key_path,
            public_key: public_key.trim().to_string(),
            generated: true,
        })
    }
}

/// `<path>.pub`
fn public_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".pub");
    PathBuf::from(os)
}

async fn write_new(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(not(unix))]
async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
