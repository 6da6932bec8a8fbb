//! Docker CLI adapter for the local container engine

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::process::{args, run_checked};
use crate::traits::ImageBuilder;
use crate::Result;

const DOCKER: &str = "docker";

/// Local `docker` engine.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        DockerCli
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(&self, context: &Path, tag: &str) -> Result<()> {
        debug!(context = %context.display(), tag = %tag, "docker build");
        let argv = args([
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context.display().to_string(),
        ]);
        run_checked(DOCKER, &argv, None).await?;
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        run_checked(DOCKER, &args(["tag", source, target]), None).await?;
        Ok(())
    }

    async fn login(&self, registry_host: &str, username: &str, password: &str) -> Result<()> {
        // Password goes over stdin so it never shows up in the process list
        let argv = args(["login", "--username", username, "--password-stdin", registry_host]);
        run_checked(DOCKER, &argv, Some(password.as_bytes())).await?;
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<()> {
        debug!(image = %image, "docker push");
        run_checked(DOCKER, &args(["push", image]), None).await?;
        Ok(())
    }
}
