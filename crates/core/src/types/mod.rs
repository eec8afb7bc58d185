//! Deployment data types

mod compile;
mod outcome;

pub use compile::{Artifact, CompileResult, ARTIFACT_OUTPUT_KEY, IMAGE_OUTPUT_KEY};
pub use outcome::{DeploymentOutcome, FallbackReason, LiveDeployOutcome, SessionDisposition};
