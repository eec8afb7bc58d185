//! Brickdeploy Core - Program packaging and live deploy for LEGO bricks
//!
//! This crate provides:
//! - UF2 block container model (write, read, concatenate, serialize)
//! - Run-script (RBF) payload builder
//! - Device packet protocol and transports (TCP, in-memory mock)
//! - Device session client
//! - Deployment orchestrator with file fallback
//! - Error types

pub mod config;
pub mod deploy;
pub mod error;
pub mod protocol;
pub mod rbf;
pub mod session;
pub mod transport;
pub mod types;
pub mod uf2;

// Re-export common types
pub use config::{DeployConfig, FamilyIdPolicy, SessionLifetime};
pub use deploy::{build_deployment_artifact, DeployPlan, Deployer};
pub use error::{DeployError, Result};
pub use protocol::PacketCodec;
pub use rbf::build_bootstrap_payload;
pub use session::{DeviceSession, Ev3Session, MockSession, RemoveOutcome, SessionState};
pub use transport::{MockTransport, TcpTransport, TcpTransportConfig, Transport};
pub use types::{Artifact, CompileResult, DeploymentOutcome, FallbackReason};
pub use uf2::BlockFile;
