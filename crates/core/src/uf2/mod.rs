//! UF2 block container
//!
//! This module provides:
//! - Block layout and single-block encode/decode
//! - `BlockFile`: byte-range writes, reads, concatenation and serialization

pub mod block;
mod file;

pub use block::{Block, BLOCK_SIZE, MAX_FILENAME_LEN, PAGE_SIZE};
pub use file::BlockFile;
