//! Brickdeploy CLI - deploy a compiled program to a LEGO brick
//!
//! Pushes the program to a device bridge when one is given, otherwise (or
//! when the device is unavailable) writes the combined UF2 file for manual
//! transfer.

mod input;

use anyhow::{Context, Result};
use brickdeploy_core::transport::reconnect_config;
use brickdeploy_core::{
    Artifact, CompileResult, DeployConfig, Deployer, DeploymentOutcome, DeviceSession,
    Ev3Session, TcpTransport, TcpTransportConfig,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Brickdeploy - package and deploy programs to a LEGO brick
#[derive(Parser, Debug)]
#[command(name = "brickdeploy")]
#[command(author = "Brickdeploy Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package and deploy compiled programs to a LEGO brick", long_about = None)]
struct Args {
    /// Compile result (.json) or raw UF2 executable image
    input: PathBuf,

    /// Base filename on the device (default: from the input)
    #[arg(short, long)]
    name: Option<String>,

    /// Device bridge address (host:port); without it only the file is written
    #[arg(short, long)]
    device: Option<String>,

    /// Where to write the UF2 file (default: <name>.uf2)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the compile result with the UF2 output added
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Device project directory
    #[arg(long)]
    project_dir: Option<String>,

    /// Do not write the UF2 file when the live deploy does not happen
    #[arg(long, default_value = "false")]
    no_save: bool,

    /// Reply timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Connection attempts before giving up
    #[arg(long, default_value = "3")]
    attempts: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!("Brickdeploy v{}", env!("CARGO_PKG_VERSION"));

    let mut compiled = input::load(&args.input, args.name.as_deref()).await?;

    let mut config = DeployConfig::cli()
        .with_live_deploy(args.device.is_some())
        .with_save_on_fallback(!args.no_save);
    if let Some(dir) = &args.project_dir {
        config = config.with_project_dir(dir.as_str());
    }
    let deployer = Deployer::new(config);

    let outcome = match &args.device {
        Some(addr) => {
            let transport = TcpTransport::new(
                TcpTransportConfig::new(addr.as_str())
                    .with_response_timeout(Duration::from_millis(args.timeout_ms))
                    .with_reconnect(reconnect_config(
                        Duration::from_secs(2),
                        Duration::from_millis(250),
                        Some(args.attempts.max(1)),
                    )),
            );
            let mut session = Ev3Session::new(transport);
            let outcome = deployer
                .build_deployment_artifact(&compiled, Some(&mut session))
                .await
                .context("Deployment failed")?;
            if !outcome.is_deployed() {
                let _ = session.disconnect().await;
            }
            outcome
        }
        None => deployer
            .build_deployment_artifact(&compiled, None)
            .await
            .context("Deployment failed")?,
    };

    if let Some(message) = outcome.user_message() {
        warn!("{}", message);
    }

    match &outcome {
        DeploymentOutcome::Deployed { artifact, live } => {
            info!("Program running on device: {}", live.rbf_path);
            if let Some(path) = &args.output {
                write_artifact(artifact, path).await?;
            }
        }
        DeploymentOutcome::Fallback { artifact: Some(artifact), .. } => {
            let path = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&artifact.filename));
            write_artifact(artifact, &path).await?;
            info!("Copy {} to the brick to run the program", path.display());
        }
        DeploymentOutcome::Fallback { artifact: None, .. } => {
            info!("Program not deployed, no file written");
        }
    }

    if let (Some(path), Some(artifact)) = (&args.json_out, outcome.artifact()) {
        write_compile_result(&mut compiled, artifact, path).await?;
    }

    Ok(())
}

async fn write_artifact(artifact: &Artifact, path: &Path) -> Result<()> {
    tokio::fs::write(path, &artifact.data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} bytes to {}", artifact.len(), path.display());
    Ok(())
}

async fn write_compile_result(
    compiled: &mut CompileResult,
    artifact: &Artifact,
    path: &Path,
) -> Result<()> {
    compiled.set_artifact(artifact);
    let json = serde_json::to_vec_pretty(compiled).context("Failed to encode compile result")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
