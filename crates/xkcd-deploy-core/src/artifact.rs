//! Backend image build and publication.

use std::fmt;
use std::path::Path;

use cloud_bridge::{CloudError, ContainerRegistry, ImageBuilder, RepositoryState};
use tracing::info;

use crate::config::PipelineConfig;
use crate::credentials::Credentials;
use crate::error::{DeployError, Result};

/// Username the registry expects alongside its short-lived password.
pub const REGISTRY_USERNAME: &str = "AWS";

/// Fully-qualified image location in the account's registry.
///
/// Only constructible through [`ImageReference::derive`], so the account and
/// region always come from resolved credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    registry_host: String,
    repository: String,
    tag: String,
}

impl ImageReference {
    pub fn derive(credentials: &Credentials, config: &PipelineConfig) -> Self {
        ImageReference {
            registry_host: format!(
                "{}.dkr.ecr.{}.amazonaws.com",
                credentials.account_id, credentials.region
            ),
            repository: config.registry_repository.clone(),
            tag: config.image_tag.clone(),
        }
    }

    pub fn registry_host(&self) -> &str {
        &self.registry_host
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name the image is built under before tagging.
    pub fn local_tag(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry_host, self.repository, self.tag)
    }
}

/// Builds the backend image and pushes it to the registry.
pub struct ArtifactPublisher;

impl ArtifactPublisher {
    pub async fn build_and_push(
        registry: &dyn ContainerRegistry,
        images: &dyn ImageBuilder,
        image: &ImageReference,
        build_context: &Path,
    ) -> Result<()> {
        match registry
            .ensure_repository(image.repository())
            .await
            .map_err(artifact("repository"))?
        {
            RepositoryState::Created => info!(repository = %image.repository(), "repository created"),
            RepositoryState::Existing => {}
        }

        if !build_context.is_dir() {
            return Err(DeployError::Artifact {
                step: "build",
                source: CloudError::NotFound(format!(
                    "build context {} is not a directory",
                    build_context.display()
                )),
            });
        }

        let local = image.local_tag();
        let remote = image.to_string();

        info!(context = %build_context.display(), tag = %local, "building image");
        images
            .build(build_context, &local)
            .await
            .map_err(artifact("build"))?;
        images
            .tag(&local, &remote)
            .await
            .map_err(artifact("tag"))?;

        // Registry tokens are short-lived; fetch one right before the push.
        let password = registry
            .login_password()
            .await
            .map_err(artifact("login"))?;
        images
            .login(image.registry_host(), REGISTRY_USERNAME, &password)
            .await
            .map_err(artifact("login"))?;

        info!(image = %remote, "pushing image");
        images.push(&remote).await.map_err(artifact("push"))?;
        Ok(())
    }
}

fn artifact(step: &'static str) -> impl FnOnce(CloudError) -> DeployError {
    move |source| DeployError::Artifact { step, source }
}
