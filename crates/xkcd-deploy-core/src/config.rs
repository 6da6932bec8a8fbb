//! Configuration loading and validation.
//!
//! The pipeline reads its settings exactly once: an env-style file overlaid
//! by the process environment becomes a [`ConfigSource`], which
//! [`ConfigResolver`] turns into the immutable [`PipelineConfig`] handed to
//! every later stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DeployError, Result};

pub const MONGO_URI: &str = "MONGO_URI";
pub const MONGO_DB: &str = "MONGO_DB";
pub const MONGO_COLLECTION: &str = "MONGO_COLLECTION";

/// Keys without which nothing can be deployed.
pub const REQUIRED_KEYS: [&str; 3] = [MONGO_URI, MONGO_DB, MONGO_COLLECTION];

/// Backend settings forwarded verbatim into the runtime env file.
pub const BACKEND_SETTING_PREFIX: &str = "TEXT_INDEX_";

pub const DEFAULT_STACK_NAME: &str = "xkcd-bot";
pub const DEFAULT_REGISTRY_REPOSITORY: &str = "xkcd-bot-api";
pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const DEFAULT_REGION: &str = "eu-central-1";
pub const DEFAULT_KEY_NAME: &str = "xkcd-bot-deploy";
pub const DEFAULT_TEMPLATE_FILE: &str = "infra/template.yaml";
pub const DEFAULT_BUILD_CONTEXT: &str = "backend";
pub const DEFAULT_FRONTEND_DIR: &str = "frontend";
pub const DEFAULT_REMOTE_USER: &str = "ec2-user";

/// Merged key/value configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    values: BTreeMap<String, String>,
    default_region: Option<String>,
}

impl ConfigSource {
    /// Build a source from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ConfigSource {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            default_region: None,
        }
    }

    /// Read `env_file` and overlay `process_env` on top of it.
    ///
    /// Values already present in the process environment win over the file.
    pub fn load<I>(env_file: &Path, process_env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if !env_file.is_file() {
            return Err(DeployError::ConfigFileMissing {
                path: env_file.to_path_buf(),
            });
        }

        let invalid = |message: String| DeployError::ConfigFileInvalid {
            path: env_file.to_path_buf(),
            message,
        };

        let mut values = BTreeMap::new();
        for item in dotenvy::from_path_iter(env_file).map_err(|e| invalid(e.to_string()))? {
            let (key, value) = item.map_err(|e| invalid(e.to_string()))?;
            values.insert(key, value);
        }
        debug!(path = %env_file.display(), keys = values.len(), "loaded env file");

        values.extend(process_env);
        Ok(ConfigSource {
            values,
            default_region: None,
        })
    }

    /// Region configured for the local cloud CLI, used when no key sets one.
    pub fn with_default_region(mut self, region: Option<String>) -> Self {
        self.default_region = region;
        self
    }

    /// Trimmed, non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn prefixed(&self, prefix: &str) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect()
    }
}

/// Immutable settings for one pipeline run.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub mongo_uri: String,
    pub mongo_db: String,
    pub mongo_collection: String,
    pub stack_name: String,
    pub registry_repository: String,
    pub image_tag: String,
    pub region: String,
    pub key_file: PathBuf,
    pub template_file: PathBuf,
    pub build_context: PathBuf,
    pub frontend_dir: PathBuf,
    pub remote_user: String,
    /// `TEXT_INDEX_*` settings for the backend.
    pub backend_settings: BTreeMap<String, String>,
}

// Hand-written so the connection string (which embeds a password) never
// reaches a log line.
impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mongo_uri", &"<redacted>")
            .field("mongo_db", &self.mongo_db)
            .field("mongo_collection", &self.mongo_collection)
            .field("stack_name", &self.stack_name)
            .field("registry_repository", &self.registry_repository)
            .field("image_tag", &self.image_tag)
            .field("region", &self.region)
            .field("key_file", &self.key_file)
            .field("template_file", &self.template_file)
            .field("build_context", &self.build_context)
            .field("frontend_dir", &self.frontend_dir)
            .field("remote_user", &self.remote_user)
            .field("backend_settings", &self.backend_settings)
            .finish()
    }
}

/// Validates a [`ConfigSource`] and fills defaults.
pub struct ConfigResolver;

impl ConfigResolver {
    /// Resolve the pipeline configuration.
    ///
    /// All missing required keys are reported together.
    pub fn resolve(source: &ConfigSource) -> Result<PipelineConfig> {
        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|k| source.get(k).is_none())
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DeployError::MissingConfigKeys { keys: missing });
        }

        let required = |key: &str| source.get(key).unwrap_or_default().to_string();
        let or_default =
            |key: &str, default: &str| source.get(key).unwrap_or(default).to_string();

        let region = source
            .get("AWS_REGION")
            .or_else(|| source.get("AWS_DEFAULT_REGION"))
            .map(str::to_string)
            .or_else(|| source.default_region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let home = source.get("HOME");
        let key_file = match source.get("KEY_FILE") {
            Some(path) => expand_home(path, home),
            None => match home {
                Some(home) => Path::new(home).join(".ssh").join(DEFAULT_KEY_NAME),
                None => Path::new(".ssh").join(DEFAULT_KEY_NAME),
            },
        };

        Ok(PipelineConfig {
            mongo_uri: required(MONGO_URI),
            mongo_db: required(MONGO_DB),
            mongo_collection: required(MONGO_COLLECTION),
            stack_name: or_default("STACK_NAME", DEFAULT_STACK_NAME),
            registry_repository: or_default("ECR_REPO", DEFAULT_REGISTRY_REPOSITORY),
            image_tag: or_default("IMAGE_TAG", DEFAULT_IMAGE_TAG),
            region,
            key_file,
            template_file: PathBuf::from(or_default("TEMPLATE_FILE", DEFAULT_TEMPLATE_FILE)),
            build_context: PathBuf::from(or_default("BUILD_CONTEXT", DEFAULT_BUILD_CONTEXT)),
            frontend_dir: PathBuf::from(or_default("FRONTEND_DIR", DEFAULT_FRONTEND_DIR)),
            remote_user: or_default("REMOTE_USER", DEFAULT_REMOTE_USER),
            backend_settings: source.prefixed(BACKEND_SETTING_PREFIX),
        })
    }
}

fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Path::new(home).join(rest),
        _ => PathBuf::from(path),
    }
}
