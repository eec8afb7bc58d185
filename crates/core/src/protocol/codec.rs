//! Packet codec for device commands and replies
//!
//! Every packet is little-endian framed:
//! [2 bytes length of the rest] [2 bytes message counter] [1 byte type] [body]
//!
//! System bodies start with the opcode (replies add a status byte).
//! Direct command bodies start with a 2-byte variable allocation followed
//! by bytecode; direct replies carry the requested global bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command::{msg_type, op, status, system, Command, Packet, Reply, MAX_CHUNK_SIZE, USER_SLOT};
use crate::error::{DeployError, Result};

/// Length prefix + message counter + type byte
pub const HEADER_LEN: usize = 5;

/// Largest encodable packet
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize + 2;

const RUN_PREFIX: [u8; 6] = [op::FILE, op::LOAD_IMAGE, op::LC2, USER_SLOT, 0x00, op::LCS];
const RUN_SUFFIX: [u8; 7] = [
    op::GV0_0,
    op::GV0_4,
    op::PROGRAM_START,
    USER_SLOT,
    op::GV0_0,
    op::GV0_4,
    0x00,
];
const STATUS_CODE: [u8; 4] = [op::PROGRAM_INFO, op::GET_STATUS, USER_SLOT, op::GV0_0];
const STOP_CODE: [u8; 2] = [op::PROGRAM_STOP, USER_SLOT];

/// Packet codec for the device protocol
pub struct PacketCodec;

impl PacketCodec {
    /// Total packet length announced by a 2-byte prefix
    #[inline]
    pub fn frame_len(prefix: [u8; 2]) -> usize {
        u16::from_le_bytes(prefix) as usize + 2
    }

    /// Encode a command packet
    pub fn encode_command(msg_id: u16, cmd: &Command) -> Result<Bytes> {
        let mut body = BytesMut::new();

        let kind = match cmd {
            Command::ProgramStatus => {
                body.put_u16_le(cmd.globals());
                body.put_slice(&STATUS_CODE);
                msg_type::DIRECT_COMMAND
            }
            Command::StopProgram => {
                body.put_u16_le(cmd.globals());
                body.put_slice(&STOP_CODE);
                msg_type::DIRECT_COMMAND
            }
            Command::RunProgram { path } => {
                body.put_u16_le(cmd.globals());
                body.put_slice(&RUN_PREFIX);
                put_path(&mut body, path)?;
                body.put_slice(&RUN_SUFFIX);
                msg_type::DIRECT_COMMAND
            }
            Command::DeleteFile { path } => {
                body.put_u8(system::DELETE_FILE);
                put_path(&mut body, path)?;
                msg_type::SYSTEM_COMMAND
            }
            Command::BeginDownload { path, size } => {
                body.put_u8(system::BEGIN_DOWNLOAD);
                body.put_u32_le(*size);
                put_path(&mut body, path)?;
                msg_type::SYSTEM_COMMAND
            }
            Command::ContinueDownload { handle, chunk } => {
                if chunk.len() > MAX_CHUNK_SIZE {
                    return Err(DeployError::InvalidInput(format!(
                        "download chunk of {} bytes (max: {})",
                        chunk.len(),
                        MAX_CHUNK_SIZE
                    )));
                }
                body.put_u8(system::CONTINUE_DOWNLOAD);
                body.put_u8(*handle);
                body.put_slice(chunk);
                msg_type::SYSTEM_COMMAND
            }
        };

        frame(msg_id, kind, &body)
    }

    /// Decode a command packet (device side)
    pub fn decode_command(buf: &[u8]) -> Result<Packet<Command>> {
        let (msg_id, kind, mut body) = split_frame(buf)?;

        let cmd = match kind {
            msg_type::DIRECT_COMMAND => {
                if body.len() < 2 {
                    return Err(malformed("direct command without allocation"));
                }
                body.advance(2);
                decode_bytecode(body)?
            }
            msg_type::SYSTEM_COMMAND => {
                if body.is_empty() {
                    return Err(malformed("system command without opcode"));
                }
                match body.get_u8() {
                    system::DELETE_FILE => Command::DeleteFile { path: take_path(&mut body)? },
                    system::BEGIN_DOWNLOAD => {
                        if body.len() < 4 {
                            return Err(malformed("begin-download without size"));
                        }
                        let size = body.get_u32_le();
                        Command::BeginDownload { path: take_path(&mut body)?, size }
                    }
                    system::CONTINUE_DOWNLOAD => {
                        if body.is_empty() {
                            return Err(malformed("continue-download without handle"));
                        }
                        let handle = body.get_u8();
                        Command::ContinueDownload { handle, chunk: Bytes::copy_from_slice(body) }
                    }
                    other => return Err(malformed(&format!("unknown system opcode {:#04x}", other))),
                }
            }
            other => return Err(malformed(&format!("unexpected command type {:#04x}", other))),
        };

        Ok(Packet { msg_id, body: cmd })
    }

    /// Encode a reply packet (device side)
    pub fn encode_reply(msg_id: u16, reply: &Reply) -> Result<Bytes> {
        let mut body = BytesMut::new();

        let kind = match reply {
            Reply::Direct { ok, globals } => {
                body.put_slice(globals);
                if *ok {
                    msg_type::DIRECT_REPLY
                } else {
                    msg_type::DIRECT_REPLY_ERROR
                }
            }
            Reply::System { command, status: code, payload } => {
                body.put_u8(*command);
                body.put_u8(*code);
                body.put_slice(payload);
                if *code == status::SUCCESS {
                    msg_type::SYSTEM_REPLY
                } else {
                    msg_type::SYSTEM_REPLY_ERROR
                }
            }
        };

        frame(msg_id, kind, &body)
    }

    /// Decode a reply packet
    pub fn decode_reply(buf: &[u8]) -> Result<Packet<Reply>> {
        let (msg_id, kind, mut body) = split_frame(buf)?;

        let reply = match kind {
            msg_type::DIRECT_REPLY | msg_type::DIRECT_REPLY_ERROR => Reply::Direct {
                ok: kind == msg_type::DIRECT_REPLY,
                globals: Bytes::copy_from_slice(body),
            },
            msg_type::SYSTEM_REPLY | msg_type::SYSTEM_REPLY_ERROR => {
                if body.len() < 2 {
                    return Err(malformed("system reply without status"));
                }
                let command = body.get_u8();
                let code = body.get_u8();
                Reply::System { command, status: code, payload: Bytes::copy_from_slice(body) }
            }
            other => return Err(malformed(&format!("unexpected reply type {:#04x}", other))),
        };

        Ok(Packet { msg_id, body: reply })
    }
}

fn malformed(what: &str) -> DeployError {
    DeployError::Transport(format!("Malformed packet: {}", what))
}

fn frame(msg_id: u16, kind: u8, body: &[u8]) -> Result<Bytes> {
    let total = HEADER_LEN + body.len();
    if total > MAX_PACKET_SIZE {
        return Err(DeployError::InvalidInput(format!(
            "packet of {} bytes (max: {})",
            total, MAX_PACKET_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le((total - 2) as u16);
    buf.put_u16_le(msg_id);
    buf.put_u8(kind);
    buf.put_slice(body);
    Ok(buf.freeze())
}

fn split_frame(mut buf: &[u8]) -> Result<(u16, u8, &[u8])> {
    if buf.len() < HEADER_LEN {
        return Err(malformed("shorter than header"));
    }
    let declared = PacketCodec::frame_len([buf[0], buf[1]]);
    if declared != buf.len() {
        return Err(malformed(&format!(
            "length prefix says {} bytes, got {}",
            declared,
            buf.len()
        )));
    }

    buf.advance(2);
    let msg_id = buf.get_u16_le();
    let kind = buf.get_u8();
    Ok((msg_id, kind, buf))
}

fn put_path(buf: &mut BytesMut, path: &str) -> Result<()> {
    if path.as_bytes().contains(&0) {
        return Err(DeployError::InvalidInput(format!("path contains NUL: {:?}", path)));
    }
    buf.put_slice(path.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn take_path(buf: &mut &[u8]) -> Result<String> {
    let len = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed("unterminated path"))?;
    let path = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len + 1);
    Ok(path)
}

fn decode_bytecode(code: &[u8]) -> Result<Command> {
    if code == STATUS_CODE {
        return Ok(Command::ProgramStatus);
    }
    if code == STOP_CODE {
        return Ok(Command::StopProgram);
    }
    if let Some(mut rest) = code.strip_prefix(&RUN_PREFIX[..]) {
        let path = take_path(&mut rest)?;
        if rest == RUN_SUFFIX {
            return Ok(Command::RunProgram { path });
        }
    }
    Err(malformed("unrecognised bytecode"))
}
