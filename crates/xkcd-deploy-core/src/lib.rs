//! xkcd-deploy core library
//!
//! One canonical pipeline that provisions and updates the xkcd bot: it
//! validates configuration and credentials, ensures an SSH keypair, brings
//! the infrastructure stack up to date, publishes the backend image, rolls
//! it out on the host, mirrors the frontend into its bucket and reports the
//! public endpoints. External systems are reached only through the
//! `cloud-bridge` ports.

pub mod artifact;
pub mod assets;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod rollout;
pub mod stack;
pub mod stage;
pub mod telemetry;

pub use artifact::{ArtifactPublisher, ImageReference};
pub use assets::{AssetSyncer, MirrorPlan, SyncReport};
pub use config::{ConfigResolver, ConfigSource, PipelineConfig};
pub use credentials::{CredentialValidator, Credentials};
pub use error::{DeployError, Result};
pub use keys::{KeyMaterial, KeyMaterialProvisioner};
pub use pipeline::{CheckReport, DeployPipeline, PipelineResult, Providers};
pub use report::Endpoints;
pub use rollout::{RemoteRolloutExecutor, RolloutSpec, RuntimePayload};
pub use stack::{DeploymentTargets, StackDeployer, StackOutputs};
pub use stage::{Stage, StageRecord};
pub use telemetry::init_tracing;
