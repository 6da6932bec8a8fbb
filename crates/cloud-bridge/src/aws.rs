//! AWS CLI adapter
//!
//! Implements the identity, stack, registry and object-store ports by
//! driving the `aws` command-line tool with JSON output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::CloudError;
use crate::process::{args, run_checked, run_tool, ToolOutput};
use crate::traits::*;
use crate::Result;

const AWS: &str = "aws";

/// `aws` CLI bound to one region.
#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
}

impl AwsCli {
    /// Create an adapter that passes `--region` on every call.
    pub fn new(region: impl Into<String>) -> Self {
        AwsCli {
            region: region.into(),
        }
    }

    fn with_region(&self, mut argv: Vec<String>) -> Vec<String> {
        argv.push("--region".to_string());
        argv.push(self.region.clone());
        argv.push("--output".to_string());
        argv.push("json".to_string());
        argv
    }

    async fn call(&self, argv: Vec<String>) -> Result<ToolOutput> {
        run_tool(AWS, &self.with_region(argv), None).await
    }

    async fn call_checked(&self, argv: Vec<String>) -> Result<ToolOutput> {
        run_checked(AWS, &self.with_region(argv), None).await
    }
}

/// Region configured for the local AWS profile (`aws configure get region`).
///
/// Returns `None` if the CLI is missing or no region is configured.
pub async fn configured_default_region() -> Option<String> {
    let out = run_tool(AWS, &args(["configure", "get", "region"]), None)
        .await
        .ok()?;
    let region = out.stdout_text();
    if out.passed() && !region.is_empty() {
        Some(region)
    } else {
        None
    }
}

fn stderr_text(out: &ToolOutput) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

fn parse_json<T: for<'de> Deserialize<'de>>(out: &ToolOutput) -> Result<T> {
    serde_json::from_slice(&out.stdout).map_err(|e| CloudError::UnexpectedOutput {
        tool: AWS.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// sts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentityJson {
    #[serde(default)]
    account: String,
    #[serde(default)]
    arn: String,
}

#[async_trait]
impl IdentityProvider for AwsCli {
    async fn caller_identity(&self) -> Result<CallerIdentity> {
        let out = self
            .call_checked(args(["sts", "get-caller-identity"]))
            .await?;
        let parsed: CallerIdentityJson = parse_json(&out)?;
        Ok(CallerIdentity {
            account: parsed.account,
            arn: parsed.arn,
        })
    }
}

// ---------------------------------------------------------------------------
// cloudformation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksJson {
    #[serde(default)]
    stacks: Vec<StackJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackJson {
    stack_name: String,
    stack_status: String,
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputJson {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterJson<'a> {
    parameter_key: &'a str,
    parameter_value: &'a str,
}

fn stack_request_args(verb: &str, request: &StackRequest) -> Result<Vec<String>> {
    // JSON form: parameter values such as connection strings may contain commas
    let parameters: Vec<ParameterJson<'_>> = request
        .parameters
        .iter()
        .map(|p| ParameterJson {
            parameter_key: &p.key,
            parameter_value: &p.value,
        })
        .collect();

    let mut argv = args([
        "cloudformation".to_string(),
        verb.to_string(),
        "--stack-name".to_string(),
        request.name.clone(),
        "--template-body".to_string(),
        format!("file://{}", request.template.display()),
        "--parameters".to_string(),
        serde_json::to_string(&parameters)?,
    ]);
    if !request.capabilities.is_empty() {
        argv.push("--capabilities".to_string());
        argv.extend(request.capabilities.iter().cloned());
    }
    Ok(argv)
}

#[async_trait]
impl StackProvider for AwsCli {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let out = self
            .call(args(["cloudformation", "describe-stacks", "--stack-name", name]))
            .await?;

        if !out.passed() {
            if stderr_text(&out).contains("does not exist") {
                debug!(stack = %name, "stack does not exist");
                return Ok(None);
            }
            return Err(CloudError::command_failed(AWS, out.exit_code, &out.stderr));
        }

        let parsed: DescribeStacksJson = parse_json(&out)?;
        Ok(parsed.stacks.into_iter().next().map(|s| StackDescription {
            name: s.stack_name,
            status: StackStatus::new(s.stack_status),
            status_reason: s.stack_status_reason,
            outputs: s
                .outputs
                .into_iter()
                .map(|o| StackOutput {
                    key: o.output_key,
                    value: o.output_value,
                })
                .collect(),
        }))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        debug!(stack = %request.name, "create-stack");
        self.call_checked(stack_request_args("create-stack", request)?)
            .await?;
        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<StackChange> {
        debug!(stack = %request.name, "update-stack");
        let out = self.call(stack_request_args("update-stack", request)?).await?;
        if out.passed() {
            return Ok(StackChange::Started);
        }
        if stderr_text(&out).contains("No updates are to be performed") {
            return Ok(StackChange::NoChanges);
        }
        Err(CloudError::command_failed(AWS, out.exit_code, &out.stderr))
    }
}

// ---------------------------------------------------------------------------
// ecr
// ---------------------------------------------------------------------------

#[async_trait]
impl ContainerRegistry for AwsCli {
    async fn ensure_repository(&self, name: &str) -> Result<RepositoryState> {
        let out = self
            .call(args(["ecr", "describe-repositories", "--repository-names", name]))
            .await?;
        if out.passed() {
            return Ok(RepositoryState::Existing);
        }
        if !stderr_text(&out).contains("RepositoryNotFoundException") {
            return Err(CloudError::command_failed(AWS, out.exit_code, &out.stderr));
        }

        info!(repository = %name, "creating registry repository");
        self.call_checked(args(["ecr", "create-repository", "--repository-name", name]))
            .await?;
        Ok(RepositoryState::Created)
    }

    async fn login_password(&self) -> Result<String> {
        // --output json would wrap the token in quotes
        let argv = args([
            "ecr",
            "get-login-password",
            "--region",
            self.region.as_str(),
        ]);
        let out = run_checked(AWS, &argv, None).await?;
        let password = out.stdout_text();
        if password.is_empty() {
            return Err(CloudError::UnexpectedOutput {
                tool: AWS.to_string(),
                message: "empty registry password".to_string(),
            });
        }
        Ok(password)
    }
}

// ---------------------------------------------------------------------------
// s3
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsJson {
    #[serde(default)]
    contents: Vec<ObjectJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectJson {
    key: String,
    size: u64,
    last_modified: String,
}

fn parse_listing(out: &ToolOutput) -> Result<Vec<RemoteObject>> {
    // An empty bucket yields no output at all
    if out.stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let parsed: ListObjectsJson = parse_json(out)?;
    parsed
        .contents
        .into_iter()
        .map(|o| {
            let last_modified = DateTime::parse_from_rfc3339(&o.last_modified)
                .map_err(|e| CloudError::UnexpectedOutput {
                    tool: AWS.to_string(),
                    message: format!("bad LastModified '{}': {}", o.last_modified, e),
                })?
                .with_timezone(&Utc);
            Ok(RemoteObject {
                key: o.key,
                size: o.size,
                last_modified,
            })
        })
        .collect()
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<RemoteObject>> {
        let out = self
            .call_checked(args(["s3api", "list-objects-v2", "--bucket", bucket]))
            .await?;
        parse_listing(&out)
    }

    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<()> {
        debug!(bucket = %bucket, key = %key, "uploading");
        let argv = args([
            "s3".to_string(),
            "cp".to_string(),
            file.display().to_string(),
            format!("s3://{}/{}", bucket, key),
            "--only-show-errors".to_string(),
            "--region".to_string(),
            self.region.clone(),
        ]);
        run_checked(AWS, &argv, None).await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        debug!(bucket = %bucket, key = %key, "deleting");
        let argv = args([
            "s3".to_string(),
            "rm".to_string(),
            format!("s3://{}/{}", bucket, key),
            "--only-show-errors".to_string(),
            "--region".to_string(),
            self.region.clone(),
        ]);
        run_checked(AWS, &argv, None).await?;
        Ok(())
    }
}
