//! Error types for brickdeploy-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum DeployError {
    // Packaging errors: contract violations, never recovered
    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid byte range: {0}")]
    Range(String),

    #[error("Read of {length} bytes at offset {offset} exceeds addressed extent {extent}")]
    OutOfRange { offset: u32, length: usize, extent: u64 },

    #[error("Family id mismatch: expected {expected:#010x}, got {got:#010x}")]
    FamilyMismatch { expected: u32, got: u32 },

    #[error("Invalid block file: {0}")]
    InvalidBlockFile(String),

    #[error("Filename too long for block: {len} bytes (max: {max})")]
    FilenameTooLong { len: usize, max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Live-deploy errors: environmental, recovered into fallback
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Not connected")]
    NotConnected,

    #[error("Session closed")]
    SessionClosed,

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{0}")]
    UserPrecondition(String),

    #[error("Device returned status {status:#04x} for command {command:#04x}")]
    DeviceStatus { command: u8, status: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Whether the error comes from the device environment (absent, busy,
    /// dropped mid-operation) rather than from a build defect.
    ///
    /// Environmental errors are the expected reasons for a fallback; any
    /// other error reaching the fallback points at a defect.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            DeployError::Connect(_)
                | DeployError::Transport(_)
                | DeployError::Timeout(_)
                | DeployError::NotConnected
                | DeployError::SessionClosed
                | DeployError::Precondition(_)
                | DeployError::UserPrecondition(_)
                | DeployError::DeviceStatus { .. }
                | DeployError::Io(_)
        )
    }

    /// Whether the message is actionable by the user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(self, DeployError::UserPrecondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeployError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: DeployError = io_err.into();
        assert!(matches!(err, DeployError::Io(_)));
    }

    #[test]
    fn test_user_precondition_message_is_verbatim() {
        let err = DeployError::UserPrecondition("please stop the program first".into());
        assert_eq!(err.to_string(), "please stop the program first");
        assert!(err.is_user_facing());
        assert!(err.is_environmental());
    }

    #[test]
    fn test_packaging_errors_are_not_environmental() {
        assert!(!DeployError::Template("missing placeholder".into()).is_environmental());
        assert!(!DeployError::Range("empty write".into()).is_environmental());
        assert!(!DeployError::OutOfRange { offset: 0, length: 10, extent: 0 }.is_environmental());
        assert!(!DeployError::FamilyMismatch { expected: 1, got: 2 }.is_environmental());
    }

    #[test]
    fn test_transport_errors_are_environmental() {
        assert!(DeployError::Connect("refused".into()).is_environmental());
        assert!(DeployError::Timeout(1000).is_environmental());
        assert!(DeployError::DeviceStatus { command: 0x92, status: 6 }.is_environmental());
    }

    #[test]
    fn test_out_of_range_display() {
        let err = DeployError::OutOfRange { offset: 256, length: 512, extent: 512 };
        assert_eq!(
            err.to_string(),
            "Read of 512 bytes at offset 256 exceeds addressed extent 512"
        );
    }
}
