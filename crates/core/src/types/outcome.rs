//! Deployment outcomes

use super::Artifact;

/// What happened to the device session after a live deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDisposition {
    /// Session disconnected after run
    Closed,
    /// Session left open for the caller
    LeftOpen,
}

/// Successful live deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDeployOutcome {
    /// Device path of the executable
    pub elf_path: String,
    /// Device path of the launched run-script
    pub rbf_path: String,
    pub session: SessionDisposition,
}

/// Why the live deploy did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// This context cannot open a device transport
    NoDeviceTransport,
    /// The live attempt failed with an environmental error
    LiveDeployFailed {
        message: String,
        /// Whether the message is meant for the user as is
        user_facing: bool,
    },
}

/// Terminal state of a deployment; every path resolves to one of these
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// Program is running on the device
    Deployed {
        artifact: Artifact,
        live: LiveDeployOutcome,
    },
    /// Program was not deployed live
    ///
    /// `artifact` is `None` only when save-on-fallback is disabled.
    Fallback {
        artifact: Option<Artifact>,
        reason: FallbackReason,
    },
}

impl DeploymentOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            DeploymentOutcome::Deployed { artifact, .. } => Some(artifact),
            DeploymentOutcome::Fallback { artifact, .. } => artifact.as_ref(),
        }
    }

    pub fn is_deployed(&self) -> bool {
        matches!(self, DeploymentOutcome::Deployed { .. })
    }

    /// Message to show the user, if the fallback carries one
    pub fn user_message(&self) -> Option<&str> {
        match self {
            DeploymentOutcome::Fallback {
                reason: FallbackReason::LiveDeployFailed { message, user_facing: true },
                ..
            } => Some(message),
            _ => None,
        }
    }
}
