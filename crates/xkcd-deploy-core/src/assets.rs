//! Frontend asset mirroring.
//!
//! The bucket is made an exact copy of the local build directory: files that
//! are new, resized or newer locally are uploaded and keys without a local
//! file are deleted. Everything else is left alone.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cloud_bridge::{ObjectStore, RemoteObject};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DeployError, Result};

/// A file under the local asset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    /// `/`-separated path relative to the asset root.
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Work needed to make the bucket match the local tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPlan {
    pub upload: Vec<LocalAsset>,
    pub delete: Vec<String>,
    pub unchanged: usize,
}

impl MirrorPlan {
    pub fn compute(local: &[LocalAsset], remote: &[RemoteObject]) -> Self {
        let remote_by_key: HashMap<&str, &RemoteObject> =
            remote.iter().map(|o| (o.key.as_str(), o)).collect();

        let mut plan = MirrorPlan::default();
        for asset in local {
            match remote_by_key.get(asset.key.as_str()) {
                Some(object)
                    if object.size == asset.size && asset.modified <= object.last_modified =>
                {
                    plan.unchanged += 1
                }
                _ => plan.upload.push(asset.clone()),
            }
        }

        let local_keys: HashSet<&str> = local.iter().map(|a| a.key.as_str()).collect();
        plan.delete = remote
            .iter()
            .filter(|o| !local_keys.contains(o.key.as_str()))
            .map(|o| o.key.clone())
            .collect();
        plan.delete.sort();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.upload.is_empty() && self.delete.is_empty()
    }
}

/// Counts from a completed sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Mirrors a local directory into a bucket.
pub struct AssetSyncer;

impl AssetSyncer {
    pub async fn sync(store: &dyn ObjectStore, local_dir: &Path, bucket: &str) -> Result<SyncReport> {
        let fail = |message: String| DeployError::Sync {
            bucket: bucket.to_string(),
            message,
        };

        // An absent directory must never turn into "delete every object".
        if !local_dir.is_dir() {
            return Err(fail(format!(
                "local asset directory {} does not exist",
                local_dir.display()
            )));
        }

        let local = scan(local_dir)
            .await
            .map_err(|e| fail(format!("reading {}: {}", local_dir.display(), e)))?;
        let remote = store
            .list_objects(bucket)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let plan = MirrorPlan::compute(&local, &remote);
        info!(
            bucket = %bucket,
            upload = plan.upload.len(),
            delete = plan.delete.len(),
            unchanged = plan.unchanged,
            "asset mirror plan"
        );
        if plan.is_empty() {
            return Ok(SyncReport {
                unchanged: plan.unchanged,
                ..SyncReport::default()
            });
        }

        for asset in &plan.upload {
            debug!(key = %asset.key, "upload");
            store
                .put_object(bucket, &asset.key, &asset.path)
                .await
                .map_err(|e| fail(format!("upload {}: {}", asset.key, e)))?;
        }
        for key in &plan.delete {
            debug!(key = %key, "delete");
            store
                .delete_object(bucket, key)
                .await
                .map_err(|e| fail(format!("delete {}: {}", key, e)))?;
        }

        Ok(SyncReport {
            uploaded: plan.upload.len(),
            deleted: plan.delete.len(),
            unchanged: plan.unchanged,
        })
    }
}

/// Every regular file below `root`, sorted by key.
pub async fn scan(root: &Path) -> std::io::Result<Vec<LocalAsset>> {
    let mut assets = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = tokio::fs::metadata(&path).await?;
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let key = object_key(root, &path);
                assets.push(LocalAsset {
                    key,
                    size: metadata.len(),
                    modified: DateTime::<Utc>::from(metadata.modified()?),
                    path,
                });
            }
        }
    }

    assets.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(assets)
}

fn object_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
