//! Device commands and replies

use bytes::Bytes;

/// Largest data chunk carried by one `ContinueDownload`
pub const MAX_CHUNK_SIZE: usize = 1000;

/// User program slot
pub const USER_SLOT: u8 = 0x01;

/// Program slot status reported by `ProgramStatus`
pub const PROGRAM_RUNNING: u8 = 0x10;
pub const PROGRAM_STOPPED: u8 = 0x40;

/// Message type byte
pub mod msg_type {
    pub const DIRECT_COMMAND: u8 = 0x00;
    pub const SYSTEM_COMMAND: u8 = 0x01;
    pub const DIRECT_REPLY: u8 = 0x02;
    pub const SYSTEM_REPLY: u8 = 0x03;
    pub const DIRECT_REPLY_ERROR: u8 = 0x04;
    pub const SYSTEM_REPLY_ERROR: u8 = 0x05;
}

/// System command opcodes
pub mod system {
    pub const BEGIN_DOWNLOAD: u8 = 0x92;
    pub const CONTINUE_DOWNLOAD: u8 = 0x93;
    pub const DELETE_FILE: u8 = 0x9C;
}

/// System reply status codes
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const UNKNOWN_HANDLE: u8 = 0x01;
    pub const HANDLE_NOT_READY: u8 = 0x02;
    pub const CORRUPT_FILE: u8 = 0x03;
    pub const NO_HANDLES_AVAILABLE: u8 = 0x04;
    /// Also what the device answers when deleting a missing file
    pub const NO_PERMISSION: u8 = 0x05;
    pub const ILLEGAL_PATH: u8 = 0x06;
    pub const FILE_EXISTS: u8 = 0x07;
    pub const END_OF_FILE: u8 = 0x08;
    pub const SIZE_ERROR: u8 = 0x09;
    pub const UNKNOWN_ERROR: u8 = 0x0A;
}

/// Direct-command bytecode
pub(crate) mod op {
    pub const PROGRAM_STOP: u8 = 0x02;
    pub const PROGRAM_START: u8 = 0x03;
    pub const PROGRAM_INFO: u8 = 0x0C;
    pub const FILE: u8 = 0xC0;

    /// PROGRAM_INFO subcommand
    pub const GET_STATUS: u8 = 0x16;
    /// FILE subcommand
    pub const LOAD_IMAGE: u8 = 0x08;

    /// Two-byte constant prefix
    pub const LC2: u8 = 0x82;
    /// NUL-terminated string constant prefix
    pub const LCS: u8 = 0x84;
    /// Global variable at offset 0
    pub const GV0_0: u8 = 0x60;
    /// Global variable at offset 4
    pub const GV0_4: u8 = 0x64;
}

/// Command sent to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query the user slot status (one global byte back)
    ProgramStatus,

    /// Stop whatever runs in the user slot
    StopProgram,

    /// Load an executable image and start it in the user slot
    RunProgram { path: String },

    /// Delete a file
    DeleteFile { path: String },

    /// Open a file for writing; the reply carries the handle
    BeginDownload { path: String, size: u32 },

    /// Append a chunk to an open download
    ContinueDownload { handle: u8, chunk: Bytes },
}

impl Command {
    /// Global variable bytes a direct command asks the device to return
    pub fn globals(&self) -> u16 {
        match self {
            Command::ProgramStatus => 1,
            Command::RunProgram { .. } => 8,
            _ => 0,
        }
    }

    /// System opcode, `None` for direct commands
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Command::DeleteFile { .. } => Some(system::DELETE_FILE),
            Command::BeginDownload { .. } => Some(system::BEGIN_DOWNLOAD),
            Command::ContinueDownload { .. } => Some(system::CONTINUE_DOWNLOAD),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::ProgramStatus => "program-status",
            Command::StopProgram => "stop",
            Command::RunProgram { .. } => "run",
            Command::DeleteFile { .. } => "delete",
            Command::BeginDownload { .. } => "begin-download",
            Command::ContinueDownload { .. } => "continue-download",
        }
    }
}

/// Reply received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Direct command reply with the requested global bytes
    Direct { ok: bool, globals: Bytes },

    /// System command reply
    System { command: u8, status: u8, payload: Bytes },
}

impl Reply {
    pub fn direct(globals: impl Into<Bytes>) -> Self {
        Reply::Direct { ok: true, globals: globals.into() }
    }

    pub fn direct_error() -> Self {
        Reply::Direct { ok: false, globals: Bytes::new() }
    }

    pub fn system(command: u8, status: u8, payload: impl Into<Bytes>) -> Self {
        Reply::System { command, status, payload: payload.into() }
    }
}

/// Packet with its message counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<T> {
    pub msg_id: u16,
    pub body: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes() {
        assert_eq!(Command::DeleteFile { path: "a".into() }.opcode(), Some(0x9C));
        assert_eq!(Command::StopProgram.opcode(), None);
        assert_eq!(Command::RunProgram { path: "a".into() }.globals(), 8);
    }
}
