//! Cloud identity check.

use cloud_bridge::IdentityProvider;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{DeployError, Result};

/// Resolved account context; lives for one run and is never written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub caller_arn: String,
    pub region: String,
}

/// Confirms the operator's credentials resolve to an account.
pub struct CredentialValidator;

impl CredentialValidator {
    pub async fn validate(
        identity: &dyn IdentityProvider,
        config: &PipelineConfig,
    ) -> Result<Credentials> {
        let caller = identity
            .caller_identity()
            .await
            .map_err(|e| DeployError::Credential(e.to_string()))?;

        let account_id = caller.account.trim().to_string();
        if account_id.is_empty() {
            return Err(DeployError::Credential(
                "provider returned an empty account id".to_string(),
            ));
        }

        info!(account = %account_id, region = %config.region, "credentials resolved");
        Ok(Credentials {
            account_id,
            caller_arn: caller.arn,
            region: config.region.clone(),
        })
    }
}
