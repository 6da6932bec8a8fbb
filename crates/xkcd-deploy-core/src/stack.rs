//! Infrastructure stack create-or-update.
//!
//! The stack owns the host, the bucket and the distribution. Deploying is
//! idempotent: an absent stack is created, a settled one is updated, and an
//! update the provider reports as empty converges to the same outputs.

use std::collections::BTreeMap;
use std::time::Duration;

use cloud_bridge::{StackChange, StackDescription, StackParameter, StackProvider, StackRequest};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{DeployError, Result};

pub const OUTPUT_BACKEND_IP: &str = "BackendPublicIp";
pub const OUTPUT_FRONTEND_BUCKET: &str = "FrontendBucketName";
pub const OUTPUT_DISTRIBUTION_URL: &str = "DistributionUrl";

pub const STACK_CAPABILITIES: [&str; 2] = ["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"];

/// Default wait between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Stack outputs keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOutputs {
    // lowercased name -> (reported name, value)
    entries: BTreeMap<String, (String, String)>,
}

impl StackOutputs {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| {
                let key: String = k.into();
                (key.to_lowercase(), (key, v.into()))
            })
            .collect();
        StackOutputs { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Output value, or `OutputMissing` naming what the stack does expose.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| DeployError::OutputMissing {
            output: name.to_string(),
            available: self.names(),
        })
    }

    /// Output names as reported by the provider.
    pub fn names(&self) -> Vec<String> {
        self.entries.values().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the outputs later stages depend on.
    pub fn targets(&self) -> Result<DeploymentTargets> {
        Ok(DeploymentTargets {
            host: self.require(OUTPUT_BACKEND_IP)?.trim().to_string(),
            bucket: self.require(OUTPUT_FRONTEND_BUCKET)?.trim().to_string(),
            distribution_url: self.require(OUTPUT_DISTRIBUTION_URL)?.trim().to_string(),
        })
    }
}

impl From<&StackDescription> for StackOutputs {
    fn from(description: &StackDescription) -> Self {
        StackOutputs::from_pairs(
            description
                .outputs
                .iter()
                .map(|o| (o.key.clone(), o.value.clone())),
        )
    }
}

/// Where the rest of the pipeline deploys to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTargets {
    /// Public address of the backend host.
    pub host: String,
    /// Bucket serving the frontend.
    pub bucket: String,
    /// Distribution URL or bare domain, as reported.
    pub distribution_url: String,
}

/// Creates or updates the stack and waits for it to settle.
#[derive(Debug, Clone)]
pub struct StackDeployer {
    poll_interval: Duration,
}

impl Default for StackDeployer {
    fn default() -> Self {
        StackDeployer {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl StackDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Template parameters for this configuration.
    pub fn parameters(config: &PipelineConfig, public_key: &str) -> Vec<StackParameter> {
        vec![
            StackParameter::new("SshPublicKey", public_key.trim()),
            StackParameter::new("MongoUri", &config.mongo_uri),
            StackParameter::new("MongoDb", &config.mongo_db),
            StackParameter::new("MongoCollection", &config.mongo_collection),
            StackParameter::new("EcrRepositoryName", &config.registry_repository),
        ]
    }

    /// Bring the stack to the desired state and return its outputs.
    pub async fn deploy(
        &self,
        stacks: &dyn StackProvider,
        config: &PipelineConfig,
        public_key: &str,
    ) -> Result<StackOutputs> {
        let name = config.stack_name.as_str();
        let request = StackRequest {
            name: name.to_string(),
            template: config.template_file.clone(),
            parameters: Self::parameters(config, public_key),
            capabilities: STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        };

        let existing = stacks
            .describe_stack(name)
            .await
            .map_err(|e| infra(name, e))?;

        let settled = match existing {
            None => {
                info!(stack = %name, "creating stack");
                stacks
                    .create_stack(&request)
                    .await
                    .map_err(|e| infra(name, e))?;
                self.wait(stacks, name).await?
            }
            Some(current) if current.status.is_dead_create() => {
                return Err(DeployError::Infrastructure {
                    stack: name.to_string(),
                    message: format!(
                        "stack is in {} after a failed create and must be deleted first",
                        current.status
                    ),
                });
            }
            Some(current) if current.status.is_in_progress() => {
                return Err(DeployError::Infrastructure {
                    stack: name.to_string(),
                    message: format!("another operation is running ({})", current.status),
                });
            }
            Some(current) => {
                info!(stack = %name, status = %current.status, "updating stack");
                match stacks
                    .update_stack(&request)
                    .await
                    .map_err(|e| infra(name, e))?
                {
                    StackChange::NoChanges => {
                        info!(stack = %name, "no updates to perform");
                        current
                    }
                    StackChange::Started => self.wait(stacks, name).await?,
                }
            }
        };

        let outputs = StackOutputs::from(&settled);
        info!(stack = %name, status = %settled.status, outputs = outputs.len(), "stack settled");
        Ok(outputs)
    }

    /// Outputs of an existing stack, without changing it.
    pub async fn current_outputs(
        &self,
        stacks: &dyn StackProvider,
        name: &str,
    ) -> Result<StackOutputs> {
        match stacks
            .describe_stack(name)
            .await
            .map_err(|e| infra(name, e))?
        {
            Some(description) => Ok(StackOutputs::from(&description)),
            None => Err(DeployError::Infrastructure {
                stack: name.to_string(),
                message: "stack does not exist".to_string(),
            }),
        }
    }

    /// Poll until the stack leaves its in-progress state.
    async fn wait(&self, stacks: &dyn StackProvider, name: &str) -> Result<StackDescription> {
        loop {
            let description = stacks
                .describe_stack(name)
                .await
                .map_err(|e| infra(name, e))?
                .ok_or_else(|| DeployError::Infrastructure {
                    stack: name.to_string(),
                    message: "stack disappeared while waiting".to_string(),
                })?;

            if description.status.is_in_progress() {
                debug!(stack = %name, status = %description.status, "waiting");
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            if description.status.is_failed() {
                let reason = description
                    .status_reason
                    .as_deref()
                    .unwrap_or("no reason reported");
                return Err(DeployError::Infrastructure {
                    stack: name.to_string(),
                    message: format!("{}: {}", description.status, reason),
                });
            }

            if !description.status.is_complete() {
                return Err(DeployError::Infrastructure {
                    stack: name.to_string(),
                    message: format!("stack settled in unexpected status {}", description.status),
                });
            }
            return Ok(description);
        }
    }
}

fn infra(stack: &str, err: cloud_bridge::CloudError) -> DeployError {
    DeployError::Infrastructure {
        stack: stack.to_string(),
        message: err.to_string(),
    }
}
