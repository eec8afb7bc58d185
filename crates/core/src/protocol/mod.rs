//! Device command protocol

pub mod codec;
pub mod command;

pub use codec::PacketCodec;
pub use command::{Command, Packet, Reply};
