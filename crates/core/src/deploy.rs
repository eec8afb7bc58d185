//! Deployment orchestrator
//!
//! Turns a compiled program into a combined block container (executable
//! image + run-script) and, when a device session is available, pushes both
//! files to the device and starts the program. Every environmental failure
//! on the device side degrades to returning the container for manual
//! transfer. Packaging failures propagate.

use crate::config::{DeployConfig, SessionLifetime};
use crate::error::{DeployError, Result};
use crate::protocol::{Command, PacketCodec};
use crate::rbf::{build_bootstrap_payload, RBF_TEMPLATE};
use crate::session::{DeviceSession, RemoveOutcome, STOP_PROGRAM_FIRST};
use crate::types::{
    Artifact, CompileResult, DeploymentOutcome, FallbackReason, LiveDeployOutcome,
    SessionDisposition,
};
use crate::uf2::{BlockFile, PAGE_SIZE};

/// Everything a deployment needs, computed before touching the device
#[derive(Debug, Clone)]
pub struct DeployPlan {
    /// Base filename with the prefix stripped
    pub base_name: String,
    /// Device path of the executable
    pub elf_path: String,
    /// Device path of the run-script
    pub rbf_path: String,
    /// Executable bytes
    pub elf: Vec<u8>,
    /// Run-script bytes
    pub rbf: Vec<u8>,
    /// Combined container holding both files
    pub container: BlockFile,
    /// Serialized `container`
    pub artifact: Artifact,
}

/// Deployment orchestrator
#[derive(Debug, Clone, Default)]
pub struct Deployer {
    config: DeployConfig,
}

impl Deployer {
    pub fn new(config: DeployConfig) -> Self {
        Self { config }
    }

    /// Non-interactive mode: the session is closed after run
    pub fn cli() -> Self {
        Self::new(DeployConfig::cli())
    }

    /// Editor mode: the session stays open after run
    pub fn interactive() -> Self {
        Self::new(DeployConfig::interactive())
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Build the run-script and assemble the combined container
    pub fn prepare(&self, compiled: &CompileResult) -> Result<DeployPlan> {
        let config = &self.config;
        let base_name = config.base_name(compiled.download_file_base_name.as_deref());
        let elf_path = format!("{}{}.elf", config.project_dir, base_name);
        let rbf_path = format!("{}{}.rbf", config.project_dir, base_name);
        check_device_path(&elf_path)?;
        check_device_path(&rbf_path)?;

        let rbf = build_bootstrap_payload(RBF_TEMPLATE, &elf_path)?;

        let image = BlockFile::parse(&compiled.image()?)?;
        if image.is_empty() {
            return Err(DeployError::InvalidInput("executable image is empty".into()));
        }

        let mut elf_file = BlockFile::new(format!("{}{}.elf", config.container_dir, base_name));
        for block in image.blocks().iter().filter(|b| !b.payload.is_empty()) {
            elf_file.write_bytes(block.target_addr, &block.payload)?;
        }

        let mut rbf_file = BlockFile::new(format!("{}{}.rbf", config.container_dir, base_name));
        rbf_file.write_bytes(0, &rbf)?;

        let container = BlockFile::concat(vec![elf_file, rbf_file], config.family_policy)?;

        // One page per block from address zero, clamped to what the blocks
        // actually address
        let extent = usize::try_from(image.extent()).unwrap_or(usize::MAX);
        let elf = image.read_bytes(0, (image.len() * PAGE_SIZE).min(extent))?;

        tracing::debug!(
            "Prepared {}: {} byte executable, {} byte run-script, {} blocks",
            base_name,
            elf.len(),
            rbf.len(),
            container.len()
        );

        let artifact = Artifact {
            filename: format!("{}.uf2", base_name),
            data: container.serialize(),
        };

        Ok(DeployPlan {
            base_name,
            elf_path,
            rbf_path,
            elf,
            rbf,
            container,
            artifact,
        })
    }

    /// Deploy a compiled program
    ///
    /// Resolves to `Deployed` when the program runs on the device, or to
    /// `Fallback` when no session is usable or the live attempt failed.
    /// Errors are returned only for packaging failures, before any device
    /// call is made.
    pub async fn build_deployment_artifact(
        &self,
        compiled: &CompileResult,
        session: Option<&mut dyn DeviceSession>,
    ) -> Result<DeploymentOutcome> {
        let plan = self.prepare(compiled)?;

        let session = match session {
            Some(session) if self.config.live_deploy => session,
            _ => {
                tracing::info!("No device transport here, saving {}", plan.artifact.filename);
                return Ok(self.fallback(plan, FallbackReason::NoDeviceTransport));
            }
        };

        match self.attempt_live_deploy(session, &plan).await {
            Ok(live) => {
                tracing::info!("Deployed {} ({:?})", live.rbf_path, live.session);
                Ok(DeploymentOutcome::Deployed {
                    artifact: plan.artifact,
                    live,
                })
            }
            Err(e) => {
                if e.is_environmental() {
                    tracing::warn!("Live deploy failed, falling back to file: {}", e);
                } else {
                    tracing::error!("Unexpected live deploy error, falling back to file: {}", e);
                }
                let reason = FallbackReason::LiveDeployFailed {
                    message: e.to_string(),
                    user_facing: e.is_user_facing(),
                };
                Ok(self.fallback(plan, reason))
            }
        }
    }

    async fn attempt_live_deploy(
        &self,
        session: &mut dyn DeviceSession,
        plan: &DeployPlan,
    ) -> Result<LiveDeployOutcome> {
        session.connect(true).await?;
        if session.is_streaming() {
            return Err(DeployError::UserPrecondition(STOP_PROGRAM_FIRST.into()));
        }

        session.stop().await?;

        if session.remove(&plan.elf_path).await? == RemoveOutcome::NotFound {
            tracing::debug!("No previous {} on device", plan.elf_path);
        }

        session.flash(&plan.elf_path, &plan.elf).await?;
        session.flash(&plan.rbf_path, &plan.rbf).await?;
        session.run(&plan.rbf_path).await?;

        let disposition = match self.config.session_lifetime {
            SessionLifetime::CloseAfterRun => {
                session.disconnect().await?;
                SessionDisposition::Closed
            }
            SessionLifetime::KeepOpen => SessionDisposition::LeftOpen,
        };

        Ok(LiveDeployOutcome {
            elf_path: plan.elf_path.clone(),
            rbf_path: plan.rbf_path.clone(),
            session: disposition,
        })
    }

    fn fallback(&self, plan: DeployPlan, reason: FallbackReason) -> DeploymentOutcome {
        let artifact = if self.config.save_on_fallback {
            Some(plan.artifact)
        } else {
            tracing::info!("Save on fallback disabled, no artifact produced");
            None
        };
        DeploymentOutcome::Fallback { artifact, reason }
    }
}

/// Reject device paths the packet protocol cannot carry
fn check_device_path(path: &str) -> Result<()> {
    PacketCodec::encode_command(
        0,
        &Command::BeginDownload {
            path: path.to_string(),
            size: 0,
        },
    )?;
    PacketCodec::encode_command(0, &Command::RunProgram { path: path.to_string() })?;
    Ok(())
}

/// Deploy `compiled` with a one-off orchestrator for `config`
pub async fn build_deployment_artifact(
    compiled: &CompileResult,
    config: DeployConfig,
    session: Option<&mut dyn DeviceSession>,
) -> Result<DeploymentOutcome> {
    Deployer::new(config)
        .build_deployment_artifact(compiled, session)
        .await
}
