//! Backend rollout on the remote host.
//!
//! The host receives the runtime configuration as an env file, pulls the
//! pushed image and replaces the single service container. Steps run in
//! order and the first failure stops the rollout.

use sha2::{Digest, Sha256};
use tracing::info;

use cloud_bridge::{CloudError, ContainerLaunch, RemoteCommand, RemoteConnector, RemoteTarget};

use crate::artifact::ImageReference;
use crate::config::{PipelineConfig, MONGO_COLLECTION, MONGO_DB, MONGO_URI};
use crate::error::{DeployError, Result};
use crate::keys::KeyMaterial;

pub const CONTAINER_NAME: &str = "xkcd-bot-api";
pub const SERVICE_PORT: u16 = 8000;
pub const RESTART_POLICY: &str = "always";
pub const ENV_FILE_NAME: &str = "xkcd-bot.env";
pub const ENV_FILE_MODE: u32 = 0o600;

/// Fixed shape of the service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutSpec {
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub restart_policy: String,
    pub env_file: String,
    pub env_file_mode: u32,
}

impl RolloutSpec {
    pub fn for_user(user: &str) -> Self {
        RolloutSpec {
            container_name: CONTAINER_NAME.to_string(),
            host_port: SERVICE_PORT,
            container_port: SERVICE_PORT,
            restart_policy: RESTART_POLICY.to_string(),
            env_file: format!("/home/{}/{}", user, ENV_FILE_NAME),
            env_file_mode: ENV_FILE_MODE,
        }
    }

    /// Remote steps that replace the running container with `image`.
    pub fn commands(&self, image: &ImageReference, region: &str) -> Vec<RemoteCommand> {
        vec![
            RemoteCommand::RegistryLogin {
                region: region.to_string(),
                registry_host: image.registry_host().to_string(),
            },
            RemoteCommand::PullImage {
                image: image.to_string(),
            },
            // refuse before the running container is removed
            RemoteCommand::EnsurePortFree {
                port: self.host_port,
                owner: self.container_name.clone(),
            },
            RemoteCommand::RemoveContainer {
                name: self.container_name.clone(),
            },
            RemoteCommand::RunContainer(ContainerLaunch {
                name: self.container_name.clone(),
                image: image.to_string(),
                host_port: self.host_port,
                container_port: self.container_port,
                restart_policy: self.restart_policy.clone(),
                env_file: self.env_file.clone(),
            }),
        ]
    }
}

/// Env-file contents handed to the container. Holds secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct RuntimePayload {
    bytes: Vec<u8>,
}

impl RuntimePayload {
    /// `KEY=value` lines for the database settings and any text index
    /// settings, in a stable order.
    pub fn render(config: &PipelineConfig) -> Self {
        let mut text = String::new();
        for (key, value) in [
            (MONGO_URI, &config.mongo_uri),
            (MONGO_DB, &config.mongo_db),
            (MONGO_COLLECTION, &config.mongo_collection),
        ] {
            text.push_str(&format!("{}={}\n", key, value));
        }
        for (key, value) in &config.backend_settings {
            text.push_str(&format!("{}={}\n", key, value));
        }
        RuntimePayload {
            bytes: text.into_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex SHA-256 of the contents, safe to log.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl std::fmt::Debug for RuntimePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePayload")
            .field("len", &self.bytes.len())
            .field("sha256", &self.digest())
            .finish()
    }
}

/// Delivers configuration and restarts the backend container.
pub struct RemoteRolloutExecutor;

impl RemoteRolloutExecutor {
    pub async fn rollout(
        connector: &dyn RemoteConnector,
        host: &str,
        keys: &KeyMaterial,
        payload: &RuntimePayload,
        image: &ImageReference,
        config: &PipelineConfig,
    ) -> Result<()> {
        let spec = RolloutSpec::for_user(&config.remote_user);
        let target = RemoteTarget {
            host: host.to_string(),
            user: config.remote_user.clone(),
            identity_file: keys.private_key.clone(),
        };
        let failed = |step: &'static str| {
            move |source: CloudError| DeployError::Rollout {
                step,
                host: host.to_string(),
                source,
            }
        };

        let session = connector.connect(&target).await.map_err(failed("connect"))?;

        info!(
            host = %host,
            path = %spec.env_file,
            sha256 = %payload.digest(),
            "uploading runtime configuration"
        );
        session
            .upload(payload.as_bytes(), &spec.env_file, spec.env_file_mode)
            .await
            .map_err(failed("upload"))?;

        for command in spec.commands(image, &config.region) {
            info!(host = %host, step = command.label(), "remote step");
            session
                .run(std::slice::from_ref(&command))
                .await
                .map_err(failed(command.label()))?;
        }

        info!(host = %host, container = %spec.container_name, image = %image, "container running");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigResolver, ConfigSource};
    use crate::credentials::Credentials;
    use cloud_bridge::fakes::FakeRemoteHost;
    use std::path::PathBuf;

    fn config() -> PipelineConfig {
        ConfigResolver::resolve(&ConfigSource::from_pairs(vec![
            ("MONGO_URI", "mongodb://user:pw@db.example:27017"),
            ("MONGO_DB", "xkcd"),
            ("MONGO_COLLECTION", "comics"),
            ("AWS_REGION", "eu-central-1"),
            ("TEXT_INDEX_NAME", "comic_text"),
        ]))
        .unwrap()
    }

    fn image(config: &PipelineConfig) -> ImageReference {
        let credentials = Credentials {
            account_id: "123456789012".to_string(),
            caller_arn: String::new(),
            region: config.region.clone(),
        };
        ImageReference::derive(&credentials, config)
    }

    fn keys() -> KeyMaterial {
        KeyMaterial {
            private_key: PathBuf::from("/tmp/deploy"),
            public_key_path: PathBuf::from("/tmp/deploy.pub"),
            public_key: "ssh-rsa AAAA xkcd-bot-deploy".to_string(),
            generated: false,
        }
    }

    #[test]
    fn test_payload_contents_and_digest() {
        let payload = RuntimePayload::render(&config());
        let text = String::from_utf8(payload.as_bytes().to_vec()).unwrap();
        assert_eq!(
            text,
            "MONGO_URI=mongodb://user:pw@db.example:27017\nMONGO_DB=xkcd\nMONGO_COLLECTION=comics\nTEXT_INDEX_NAME=comic_text\n"
        );
        assert_eq!(payload.digest().len(), 64);
        assert!(!format!("{:?}", payload).contains("pw@"));
    }

    #[test]
    fn test_spec_for_user() {
        let spec = RolloutSpec::for_user("ec2-user");
        assert_eq!(spec.env_file, "/home/ec2-user/xkcd-bot.env");
        assert_eq!(spec.env_file_mode, 0o600);
        assert_eq!(spec.host_port, 8000);
    }

    #[tokio::test]
    async fn test_rollout_replaces_existing_container() {
        let config = config();
        let image = image(&config);
        let host = FakeRemoteHost::new();
        host.seed_container(CONTAINER_NAME, "old:image", SERVICE_PORT);

        RemoteRolloutExecutor::rollout(
            &host,
            "203.0.113.10",
            &keys(),
            &RuntimePayload::render(&config),
            &image,
            &config,
        )
        .await
        .unwrap();

        let containers = host.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, CONTAINER_NAME);
        assert_eq!(containers[0].image, image.to_string());
        assert_eq!(containers[0].restart_policy, "always");

        let (_, mode) = host.file("/home/ec2-user/xkcd-bot.env").unwrap();
        assert_eq!(mode, 0o600);

        let labels: Vec<&str> = host.executed().iter().map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec![
                "registry_login",
                "pull_image",
                "ensure_port_free",
                "remove_container",
                "run_container"
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_port_holder_stops_before_removal() {
        let config = config();
        let host = FakeRemoteHost::new();
        host.seed_container("legacy-api", "someone/else:1", SERVICE_PORT);

        let err = RemoteRolloutExecutor::rollout(
            &host,
            "203.0.113.10",
            &keys(),
            &RuntimePayload::render(&config),
            &image(&config),
            &config,
        )
        .await
        .unwrap_err();

        assert_eq!(err.exit_code(), 7);
        assert!(matches!(
            err,
            DeployError::Rollout {
                step: "ensure_port_free",
                source: CloudError::Conflict(_),
                ..
            }
        ));
        let labels: Vec<&str> = host.executed().iter().map(|c| c.label()).collect();
        assert!(!labels.contains(&"remove_container"));
        assert_eq!(host.containers()[0].name, "legacy-api");
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let config = config();
        let err = RemoteRolloutExecutor::rollout(
            &FakeRemoteHost::unreachable(),
            "203.0.113.10",
            &keys(),
            &RuntimePayload::render(&config),
            &image(&config),
            &config,
        )
        .await
        .unwrap_err();

        assert_eq!(err.exit_code(), 7);
        assert!(matches!(
            err,
            DeployError::Rollout {
                step: "connect",
                source: CloudError::Unreachable { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_pull_stops_before_container_changes() {
        let config = config();
        let host = FakeRemoteHost::new().failing_at("pull_image");
        host.seed_container(CONTAINER_NAME, "old:image", SERVICE_PORT);

        let err = RemoteRolloutExecutor::rollout(
            &host,
            "203.0.113.10",
            &keys(),
            &RuntimePayload::render(&config),
            &image(&config),
            &config,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::Rollout { step: "pull_image", .. }));
        assert_eq!(host.containers()[0].image, "old:image");
    }
}
