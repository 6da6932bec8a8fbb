//! The deploy pipeline.
//!
//! Stages run strictly in order, each consuming what earlier ones produced:
//!
//! ```text
//! config -> credentials -> key_material -> stack -> artifact -> rollout -> assets -> report
//! ```
//!
//! Providers are wired from the resolved configuration, so nothing can reach
//! an external system before configuration is complete. The first failing
//! stage aborts the run; nothing is rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use cloud_bridge::{
    AwsCli, ContainerRegistry, DockerCli, IdentityProvider, ImageBuilder, KeyGenerator,
    ObjectStore, RemoteConnector, SshConnector, SshKeygen, StackProvider,
};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::artifact::{ArtifactPublisher, ImageReference};
use crate::assets::{AssetSyncer, SyncReport};
use crate::config::{ConfigResolver, ConfigSource, PipelineConfig};
use crate::credentials::{CredentialValidator, Credentials};
use crate::error::{DeployError, Result};
use crate::keys::KeyMaterialProvisioner;
use crate::obs::{
    emit_run_finished, emit_run_started, emit_stage_failed, emit_stage_finished,
    emit_stage_started, run_span,
};
use crate::report::Endpoints;
use crate::rollout::{RemoteRolloutExecutor, RuntimePayload};
use crate::stack::StackDeployer;
use crate::stage::{Stage, StageRecord};

/// Adapters for every external system a run touches.
#[derive(Clone)]
pub struct Providers {
    pub identity: Arc<dyn IdentityProvider>,
    pub stacks: Arc<dyn StackProvider>,
    pub registry: Arc<dyn ContainerRegistry>,
    pub images: Arc<dyn ImageBuilder>,
    pub remote: Arc<dyn RemoteConnector>,
    pub objects: Arc<dyn ObjectStore>,
    pub keys: Arc<dyn KeyGenerator>,
}

impl Providers {
    /// CLI-backed providers for the configured region.
    pub fn system(config: &PipelineConfig) -> Self {
        let aws = Arc::new(AwsCli::new(config.region.clone()));
        Providers {
            identity: aws.clone(),
            stacks: aws.clone(),
            registry: aws.clone(),
            images: Arc::new(DockerCli::new()),
            remote: Arc::new(SshConnector::default()),
            objects: aws,
            keys: Arc::new(SshKeygen::new()),
        }
    }
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub stages: Vec<StageRecord>,
    pub endpoints: Endpoints,
    pub assets: SyncReport,
    pub duration_ms: u64,
}

/// Outcome of `check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub run_id: String,
    pub stack_name: String,
    pub account_id: String,
    pub caller_arn: String,
    pub region: String,
}

/// Runs the pipeline and its read-only variants.
#[derive(Debug, Clone, Default)]
pub struct DeployPipeline {
    stack_deployer: StackDeployer,
}

impl DeployPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_deployer(mut self, deployer: StackDeployer) -> Self {
        self.stack_deployer = deployer;
        self
    }

    /// Full deploy. `wire` builds providers once configuration resolved.
    pub async fn deploy<F>(&self, source: &ConfigSource, wire: F) -> Result<PipelineResult>
    where
        F: FnOnce(&PipelineConfig) -> Providers,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id, "deploy");
        async {
            emit_run_started(&run_id, "deploy");
            let start = Instant::now();
            let mut stages = Vec::new();

            let outcome = self.run_deploy(source, wire, &mut stages).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            emit_run_finished(&run_id, duration_ms, outcome.is_ok());

            let (endpoints, assets) = outcome?;
            Ok::<_, DeployError>(PipelineResult {
                run_id: run_id.clone(),
                stages,
                endpoints,
                assets,
                duration_ms,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_deploy<F>(
        &self,
        source: &ConfigSource,
        wire: F,
        stages: &mut Vec<StageRecord>,
    ) -> Result<(Endpoints, SyncReport)>
    where
        F: FnOnce(&PipelineConfig) -> Providers,
    {
        let config = timed(stages, Stage::Config, async {
            ConfigResolver::resolve(source)
        })
        .await?;
        let providers = wire(&config);

        let credentials = timed(
            stages,
            Stage::Credentials,
            CredentialValidator::validate(providers.identity.as_ref(), &config),
        )
        .await?;

        let keys = timed(
            stages,
            Stage::KeyMaterial,
            KeyMaterialProvisioner::ensure_key_pair(providers.keys.as_ref(), &config.key_file),
        )
        .await?;

        let targets = timed(stages, Stage::Stack, async {
            self.stack_deployer
                .deploy(providers.stacks.as_ref(), &config, &keys.public_key)
                .await?
                .targets()
        })
        .await?;

        let image = ImageReference::derive(&credentials, &config);
        timed(
            stages,
            Stage::Artifact,
            ArtifactPublisher::build_and_push(
                providers.registry.as_ref(),
                providers.images.as_ref(),
                &image,
                &config.build_context,
            ),
        )
        .await?;

        let payload = RuntimePayload::render(&config);
        timed(
            stages,
            Stage::Rollout,
            RemoteRolloutExecutor::rollout(
                providers.remote.as_ref(),
                &targets.host,
                &keys,
                &payload,
                &image,
                &config,
            ),
        )
        .await?;

        let assets = timed(
            stages,
            Stage::Assets,
            AssetSyncer::sync(providers.objects.as_ref(), &config.frontend_dir, &targets.bucket),
        )
        .await?;

        let endpoints = timed(stages, Stage::Report, async {
            Ok(Endpoints::from_targets(&targets, &config.region))
        })
        .await?;

        Ok((endpoints, assets))
    }

    /// Resolve configuration and confirm credentials; changes nothing.
    pub async fn check<F>(&self, source: &ConfigSource, wire: F) -> Result<CheckReport>
    where
        F: FnOnce(&PipelineConfig) -> Providers,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id, "check");
        async {
            emit_run_started(&run_id, "check");
            let start = Instant::now();
            let outcome = Self::preflight(source, wire, &mut Vec::new()).await;
            emit_run_finished(
                &run_id,
                start.elapsed().as_millis() as u64,
                outcome.is_ok(),
            );

            let (config, _, credentials) = outcome?;
            Ok::<_, DeployError>(CheckReport {
                run_id: run_id.clone(),
                stack_name: config.stack_name,
                account_id: credentials.account_id,
                caller_arn: credentials.caller_arn,
                region: credentials.region,
            })
        }
        .instrument(span)
        .await
    }

    /// Endpoints of the already-deployed stack; changes nothing.
    pub async fn outputs<F>(&self, source: &ConfigSource, wire: F) -> Result<Endpoints>
    where
        F: FnOnce(&PipelineConfig) -> Providers,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id, "outputs");
        async {
            emit_run_started(&run_id, "outputs");
            let start = Instant::now();
            let mut stages = Vec::new();

            let outcome = async {
                let (config, providers, _) = Self::preflight(source, wire, &mut stages).await?;
                timed(&mut stages, Stage::Stack, async {
                    let outputs = self
                        .stack_deployer
                        .current_outputs(providers.stacks.as_ref(), &config.stack_name)
                        .await?;
                    Ok::<_, DeployError>(Endpoints::from_targets(
                        &outputs.targets()?,
                        &config.region,
                    ))
                })
                .await
            }
            .await;

            emit_run_finished(
                &run_id,
                start.elapsed().as_millis() as u64,
                outcome.is_ok(),
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn preflight<F>(
        source: &ConfigSource,
        wire: F,
        stages: &mut Vec<StageRecord>,
    ) -> Result<(PipelineConfig, Providers, Credentials)>
    where
        F: FnOnce(&PipelineConfig) -> Providers,
    {
        let config = timed(stages, Stage::Config, async {
            ConfigResolver::resolve(source)
        })
        .await?;
        let providers = wire(&config);
        let credentials = timed(
            stages,
            Stage::Credentials,
            CredentialValidator::validate(providers.identity.as_ref(), &config),
        )
        .await?;
        Ok((config, providers, credentials))
    }
}

/// Run one stage, emitting its lifecycle events and recording its duration.
async fn timed<T, Fut>(stages: &mut Vec<StageRecord>, stage: Stage, work: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    emit_stage_started(stage);
    let start = Instant::now();
    match work.await {
        Ok(value) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            emit_stage_finished(stage, duration_ms);
            stages.push(StageRecord { stage, duration_ms });
            Ok(value)
        }
        Err(err) => {
            emit_stage_failed(stage, &err);
            Err(err)
        }
    }
}
