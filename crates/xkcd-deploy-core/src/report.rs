//! Public endpoints of a deployment.

use std::fmt;

use serde::Serialize;

use crate::rollout::SERVICE_PORT;
use crate::stack::DeploymentTargets;

/// Regions whose website endpoints use `s3-website-<region>` rather than
/// `s3-website.<region>`.
const LEGACY_WEBSITE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "eu-west-1",
    "sa-east-1",
    "us-gov-west-1",
];

/// Where a user reaches the deployed system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub backend: String,
    pub site: String,
    pub distribution: String,
}

impl Endpoints {
    pub fn from_targets(targets: &DeploymentTargets, region: &str) -> Self {
        Endpoints {
            backend: format!("http://{}:{}", targets.host, SERVICE_PORT),
            site: website_url(&targets.bucket, region),
            distribution: distribution_url(&targets.distribution_url),
        }
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backend API:    {}", self.backend)?;
        writeln!(f, "Static site:    {}", self.site)?;
        write!(f, "Distribution:   {}", self.distribution)
    }
}

fn website_url(bucket: &str, region: &str) -> String {
    let separator = if LEGACY_WEBSITE_REGIONS.contains(&region) {
        '-'
    } else {
        '.'
    };
    format!(
        "http://{}.s3-website{}{}.amazonaws.com",
        bucket, separator, region
    )
}

fn distribution_url(value: &str) -> String {
    if value.starts_with("https://") || value.starts_with("http://") {
        value.to_string()
    } else {
        format!("https://{}", value)
    }
}
