//! Single UF2 block: layout constants and wire encode/decode
//!
//! Every block is 512 bytes:
//! [32-byte header of LE words] [476-byte data area] [4-byte end magic]
//!
//! Header words: magic0, magic1, flags, target address, payload size,
//! block number, block count, and a trailer word holding either the file
//! size (file containers) or the family id (when flagged).

use bytes::{Buf, BufMut, BytesMut};

/// First start magic ("UF2\n")
pub const MAGIC_START0: u32 = 0x0A32_4655;
/// Second start magic
pub const MAGIC_START1: u32 = 0x9E5D_5157;
/// End magic
pub const MAGIC_END: u32 = 0x0AB1_6F30;

/// Raw block length (bytes)
pub const BLOCK_SIZE: usize = 512;
/// Header length (bytes)
pub const HEADER_SIZE: usize = 32;
/// Payload capacity of writer-allocated blocks (bytes)
pub const PAGE_SIZE: usize = 256;
/// Largest payload a block can declare; larger values are read as a page
pub const MAX_PAYLOAD_SIZE: usize = BLOCK_SIZE - HEADER_SIZE - 4;
/// Longest filename that fits after a full page, leaving room for the NUL
pub const MAX_FILENAME_LEN: usize = MAX_PAYLOAD_SIZE - PAGE_SIZE - 1;

pub const FLAG_FILE_CONTAINER: u32 = 0x0000_1000;
pub const FLAG_FAMILY_ID_PRESENT: u32 = 0x0000_2000;

/// A fixed-size addressable chunk of a block file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block flags (`FLAG_*`)
    pub flags: u32,
    /// Device memory offset of the first payload byte
    pub target_addr: u32,
    /// Payload bytes, never longer than `MAX_PAYLOAD_SIZE`
    pub payload: Vec<u8>,
    /// 0-based position in the owning container
    pub block_index: u32,
    /// Block count of the owning container
    pub total_blocks: u32,
    /// Family id (meaningful with `FLAG_FAMILY_ID_PRESENT`)
    pub family_id: u32,
    /// Size of the contained file (meaningful with `FLAG_FILE_CONTAINER`)
    pub file_size: u32,
    /// Name of the contained file (file containers only)
    pub filename: Option<String>,
}

impl Block {
    /// Zero-filled page at `target_addr`
    pub(crate) fn page(target_addr: u32, flags: u32, family_id: u32, filename: Option<String>) -> Self {
        Self {
            flags,
            target_addr,
            payload: vec![0; PAGE_SIZE],
            block_index: 0,
            total_blocks: 0,
            family_id,
            file_size: 0,
            filename,
        }
    }

    /// One past the last addressed byte
    #[inline]
    pub fn end_addr(&self) -> u64 {
        self.target_addr as u64 + self.payload.len() as u64
    }

    #[inline]
    pub fn is_file_container(&self) -> bool {
        self.flags & FLAG_FILE_CONTAINER != 0
    }

    fn trailer_word(&self) -> u32 {
        if self.is_file_container() {
            self.file_size
        } else if self.flags & FLAG_FAMILY_ID_PRESENT != 0 {
            self.family_id
        } else {
            0
        }
    }

    /// Append the 512-byte wire form of this block to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.reserve(BLOCK_SIZE);

        buf.put_u32_le(MAGIC_START0);
        buf.put_u32_le(MAGIC_START1);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.target_addr);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_u32_le(self.block_index);
        buf.put_u32_le(self.total_blocks);
        buf.put_u32_le(self.trailer_word());

        let payload = &self.payload[..self.payload.len().min(MAX_PAYLOAD_SIZE)];
        buf.put_slice(payload);

        if let Some(name) = self.filename.as_ref().filter(|_| self.is_file_container()) {
            // NUL terminator comes from the zero fill below
            let room = (MAX_PAYLOAD_SIZE - payload.len()).saturating_sub(1);
            let name = name.as_bytes();
            buf.put_slice(&name[..name.len().min(room)]);
        }

        buf.resize(start + BLOCK_SIZE - 4, 0);
        buf.put_u32_le(MAGIC_END);
    }

    /// Decode one 512-byte chunk; `None` when the magic words do not match
    pub fn decode(chunk: &[u8]) -> Option<Self> {
        if chunk.len() != BLOCK_SIZE {
            return None;
        }

        let mut head = &chunk[..HEADER_SIZE];
        let magic0 = head.get_u32_le();
        let magic1 = head.get_u32_le();
        let flags = head.get_u32_le();
        let target_addr = head.get_u32_le();
        let declared_size = head.get_u32_le();
        let block_index = head.get_u32_le();
        let total_blocks = head.get_u32_le();
        let trailer = head.get_u32_le();

        let mut tail = &chunk[BLOCK_SIZE - 4..];
        let magic_end = tail.get_u32_le();

        if magic0 != MAGIC_START0 || magic1 != MAGIC_START1 || magic_end != MAGIC_END {
            return None;
        }

        let payload_size = match declared_size as usize {
            n if n > MAX_PAYLOAD_SIZE => PAGE_SIZE,
            n => n,
        };
        let data_end = HEADER_SIZE + payload_size;
        let payload = chunk[HEADER_SIZE..data_end].to_vec();

        let mut block = Self {
            flags,
            target_addr,
            payload,
            block_index,
            total_blocks,
            family_id: 0,
            file_size: 0,
            filename: None,
        };

        if flags & FLAG_FILE_CONTAINER != 0 {
            let name = &chunk[data_end..BLOCK_SIZE - 4];
            let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
            block.filename = Some(String::from_utf8_lossy(&name[..len]).into_owned());
            block.file_size = trailer;
        }
        if flags & FLAG_FAMILY_ID_PRESENT != 0 {
            block.family_id = trailer;
        }

        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    }

    #[test]
    fn test_encode_layout() {
        let mut block = Block::page(0x100, FLAG_FILE_CONTAINER, 0, Some("Projects/a.elf".into()));
        block.payload[0] = 0xAB;
        block.block_index = 3;
        block.total_blocks = 7;
        block.file_size = 0x180;

        let mut buf = BytesMut::new();
        block.encode(&mut buf);

        assert_eq!(buf.len(), BLOCK_SIZE);
        assert_eq!(word(&buf, 0), MAGIC_START0);
        assert_eq!(word(&buf, 4), MAGIC_START1);
        assert_eq!(word(&buf, 8), FLAG_FILE_CONTAINER);
        assert_eq!(word(&buf, 12), 0x100);
        assert_eq!(word(&buf, 16), PAGE_SIZE as u32);
        assert_eq!(word(&buf, 20), 3);
        assert_eq!(word(&buf, 24), 7);
        assert_eq!(word(&buf, 28), 0x180);
        assert_eq!(buf[HEADER_SIZE], 0xAB);
        assert_eq!(&buf[HEADER_SIZE + PAGE_SIZE..HEADER_SIZE + PAGE_SIZE + 14], b"Projects/a.elf");
        assert_eq!(buf[HEADER_SIZE + PAGE_SIZE + 14], 0);
        assert_eq!(word(&buf, BLOCK_SIZE - 4), MAGIC_END);
    }

    #[test]
    fn test_family_id_in_trailer() {
        let block = Block::page(0, FLAG_FAMILY_ID_PRESENT, 0xE48B_FF56, None);
        let mut buf = BytesMut::new();
        block.encode(&mut buf);
        assert_eq!(word(&buf, 28), 0xE48B_FF56);

        let decoded = Block::decode(&buf).unwrap();
        assert_eq!(decoded.family_id, 0xE48B_FF56);
        assert_eq!(decoded.filename, None);
    }

    #[test]
    fn test_decode_reads_filename_and_size() {
        let mut block = Block::page(0x200, FLAG_FILE_CONTAINER, 0, Some("Projects/b.rbf".into()));
        block.file_size = 0x2a;
        let mut buf = BytesMut::new();
        block.encode(&mut buf);

        let decoded = Block::decode(&buf).unwrap();
        assert_eq!(decoded.target_addr, 0x200);
        assert_eq!(decoded.payload.len(), PAGE_SIZE);
        assert_eq!(decoded.filename.as_deref(), Some("Projects/b.rbf"));
        assert_eq!(decoded.file_size, 0x2a);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let block = Block::page(0, 0, 0, None);
        let mut buf = BytesMut::new();
        block.encode(&mut buf);
        buf[0] ^= 0xff;
        assert!(Block::decode(&buf).is_none());
    }

    #[test]
    fn test_decode_rejects_short_chunk() {
        assert!(Block::decode(&[0u8; 100]).is_none());
    }

    #[test]
    fn test_oversized_payload_reads_as_page() {
        let block = Block::page(0, 0, 0, None);
        let mut buf = BytesMut::new();
        block.encode(&mut buf);
        buf[16..20].copy_from_slice(&1000u32.to_le_bytes());

        let decoded = Block::decode(&buf).unwrap();
        assert_eq!(decoded.payload.len(), PAGE_SIZE);
    }
}
