//! xkcd-deploy - provision and update the xkcd bot
//!
//! ## Commands
//!
//! - `deploy`: run the full pipeline and print the public endpoints
//! - `check`: validate configuration and cloud credentials only
//! - `outputs`: print the endpoints of the deployed stack
//! - `doctor`: report the external tools the pipeline shells out to
//!
//! Exit codes follow the pipeline's error taxonomy (`DeployError::exit_code`);
//! `64` is a command-line usage error and `70` anything unexpected.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use cloud_bridge::{configured_default_region, is_tool_available, tool_version, REQUIRED_TOOLS};
use xkcd_deploy_core::{init_tracing, ConfigSource, DeployError, DeployPipeline, Providers};

const EXIT_USAGE: u8 = 64;
const EXIT_INTERNAL: u8 = 70;

#[derive(Parser)]
#[command(name = "xkcd-deploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and update the xkcd bot deployment", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: stack, image, rollout, assets
    Deploy {
        /// Env-style configuration file
        #[arg(long, env = "XKCD_DEPLOY_ENV_FILE", default_value = ".env")]
        env_file: PathBuf,
    },

    /// Validate configuration and cloud credentials without changing anything
    Check {
        /// Env-style configuration file
        #[arg(long, env = "XKCD_DEPLOY_ENV_FILE", default_value = ".env")]
        env_file: PathBuf,
    },

    /// Print the endpoints of the already-deployed stack
    Outputs {
        /// Env-style configuration file
        #[arg(long, env = "XKCD_DEPLOY_ENV_FILE", default_value = ".env")]
        env_file: PathBuf,
    },

    /// Report availability of aws, docker, ssh and ssh-keygen
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let json = cli.json;
    let outcome = match cli.command {
        Commands::Deploy { env_file } => cmd_deploy(&env_file, json).await,
        Commands::Check { env_file } => cmd_check(&env_file, json).await,
        Commands::Outputs { env_file } => cmd_outputs(&env_file, json).await,
        Commands::Doctor => cmd_doctor(json).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Pipeline failures keep their taxonomy code; everything else is internal.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DeployError>()
        .and_then(|e| u8::try_from(e.exit_code()).ok())
        .unwrap_or(EXIT_INTERNAL)
}

/// Env file overlaid by the process environment, plus the cloud CLI's
/// configured region when no region key is set.
async fn load_source(env_file: &Path) -> Result<ConfigSource, DeployError> {
    let process_env = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    let source = ConfigSource::load(env_file, process_env)?;

    if source.get("AWS_REGION").is_some() || source.get("AWS_DEFAULT_REGION").is_some() {
        return Ok(source);
    }
    let region = configured_default_region().await;
    Ok(source.with_default_region(region))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn cmd_deploy(env_file: &Path, json: bool) -> Result<()> {
    let source = load_source(env_file).await?;
    let result = DeployPipeline::new()
        .deploy(&source, Providers::system)
        .await?;

    if json {
        return print_json(&result);
    }

    info!(run_id = %result.run_id, duration_ms = result.duration_ms, "deploy complete");
    println!("Deployment complete.");
    println!();
    println!("{}", result.endpoints);
    println!();
    println!(
        "Assets: {} uploaded, {} deleted, {} unchanged",
        result.assets.uploaded, result.assets.deleted, result.assets.unchanged
    );
    Ok(())
}

async fn cmd_check(env_file: &Path, json: bool) -> Result<()> {
    let source = load_source(env_file).await?;
    let report = DeployPipeline::new()
        .check(&source, Providers::system)
        .await?;

    if json {
        return print_json(&report);
    }

    println!("Configuration OK");
    println!("  Stack:   {}", report.stack_name);
    println!("  Account: {}", report.account_id);
    println!("  Caller:  {}", report.caller_arn);
    println!("  Region:  {}", report.region);
    Ok(())
}

async fn cmd_outputs(env_file: &Path, json: bool) -> Result<()> {
    let source = load_source(env_file).await?;
    let endpoints = DeployPipeline::new()
        .outputs(&source, Providers::system)
        .await?;

    if json {
        return print_json(&endpoints);
    }
    println!("{}", endpoints);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ToolStatus {
    name: &'static str,
    available: bool,
    version: Option<String>,
}

async fn tool_statuses() -> Vec<ToolStatus> {
    let mut statuses = Vec::with_capacity(REQUIRED_TOOLS.len());
    for &(name, probe) in REQUIRED_TOOLS {
        let available = is_tool_available(name, probe).await;
        let version = if available {
            tool_version(name, probe).await
        } else {
            None
        };
        statuses.push(ToolStatus {
            name,
            available,
            version,
        });
    }
    statuses
}

async fn cmd_doctor(json: bool) -> Result<()> {
    let statuses = tool_statuses().await;

    if json {
        print_json(&statuses)?;
    } else {
        println!("xkcd-deploy environment");
        println!("=======================");
        for status in &statuses {
            let detail = match (&status.version, status.available) {
                (Some(version), _) => version.clone(),
                (None, true) => "installed".to_string(),
                (None, false) => "not found".to_string(),
            };
            println!("  {:<11} {}", status.name, detail);
        }
    }

    let missing: Vec<&str> = statuses
        .iter()
        .filter(|s| !s.available)
        .map(|s| s.name)
        .collect();
    if !missing.is_empty() {
        bail!("required tools not found: {}", missing.join(", "));
    }
    Ok(())
}
