//! In-memory block file: a sparse memory image split into addressed blocks

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use super::block::{
    Block, BLOCK_SIZE, FLAG_FAMILY_ID_PRESENT, FLAG_FILE_CONTAINER, MAX_FILENAME_LEN, PAGE_SIZE,
};
use crate::config::FamilyIdPolicy;
use crate::error::{DeployError, Result};

const PAGE_MASK: u32 = !(PAGE_SIZE as u32 - 1);

/// Ordered sequence of blocks plus a logical filename tag
///
/// Blocks are kept in allocation order. `block_index` and `total_blocks`
/// are renumbered after every mutation so the container is always valid
/// to serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFile {
    filename: Option<String>,
    family_id: u32,
    file_size: u32,
    blocks: Vec<Block>,
    /// Page address -> position in `blocks`
    pages: HashMap<u32, usize>,
}

impl BlockFile {
    /// Create an empty container tagged with a logical filename
    ///
    /// Blocks written into it become file-container blocks that carry the
    /// name and the file size.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Default::default()
        }
    }

    /// Create an empty container without a filename tag
    pub fn untagged() -> Self {
        Self::default()
    }

    /// Set the family id stamped into untagged blocks
    pub fn with_family_id(mut self, family_id: u32) -> Self {
        self.family_id = family_id;
        self
    }

    /// Parse a serialized container
    ///
    /// Chunks whose magic words do not match are skipped, as is a trailing
    /// partial chunk. Fails only when non-empty input holds no valid block.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut file = Self::default();

        for (i, chunk) in bytes.chunks(BLOCK_SIZE).enumerate() {
            match Block::decode(chunk) {
                Some(block) => {
                    if block.flags & FLAG_FAMILY_ID_PRESENT != 0 && file.family_id == 0 {
                        file.family_id = block.family_id;
                    }
                    if block.payload.len() == PAGE_SIZE && block.target_addr & !PAGE_MASK == 0 {
                        file.pages.insert(block.target_addr, file.blocks.len());
                    }
                    file.file_size = file.file_size.max(block.end_addr().min(u32::MAX as u64) as u32);
                    file.blocks.push(block);
                }
                None => tracing::debug!("Skipping invalid block chunk {} ({} bytes)", i, chunk.len()),
            }
        }

        if !bytes.is_empty() && file.blocks.is_empty() {
            return Err(DeployError::InvalidBlockFile(format!(
                "no valid block in {} bytes",
                bytes.len()
            )));
        }

        file.finalize();
        Ok(file)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn family_id(&self) -> u32 {
        self.family_id
    }

    /// Highest written end address
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// One past the highest byte any block addresses
    pub fn extent(&self) -> u64 {
        self.blocks.iter().map(Block::end_addr).max().unwrap_or(0)
    }

    /// Copy `data` into the container starting at `target_addr`
    ///
    /// Pages covering the range are allocated on demand. Bytes already
    /// present in the range are overwritten; untouched page bytes stay zero.
    pub fn write_bytes(&mut self, target_addr: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(DeployError::Range(format!(
                "empty write at {:#x} allocates no block",
                target_addr
            )));
        }

        let end = target_addr as u64 + data.len() as u64;
        if end > u32::MAX as u64 {
            return Err(DeployError::Range(format!(
                "write of {} bytes at {:#x} overflows the address space",
                data.len(),
                target_addr
            )));
        }

        if let Some(name) = &self.filename {
            if name.len() > MAX_FILENAME_LEN {
                return Err(DeployError::FilenameTooLong {
                    len: name.len(),
                    max: MAX_FILENAME_LEN,
                });
            }
        }

        let mut addr = target_addr;
        let mut rest = data;
        while !rest.is_empty() {
            let page = addr & PAGE_MASK;
            let offset = (addr - page) as usize;
            let n = (PAGE_SIZE - offset).min(rest.len());

            let pos = self.page_position(page);
            self.blocks[pos].payload[offset..offset + n].copy_from_slice(&rest[..n]);

            addr = addr.wrapping_add(n as u32);
            rest = &rest[n..];
        }

        self.file_size = self.file_size.max(end as u32);
        self.finalize();
        Ok(())
    }

    /// Reconstruct `length` bytes starting at `offset`, in address order
    ///
    /// Gaps between blocks read as zero. Fails when the range runs past the
    /// container's addressed extent.
    pub fn read_bytes(&self, offset: u32, length: usize) -> Result<Vec<u8>> {
        let extent = self.extent();
        let start = offset as u64;
        let end = start + length as u64;
        if end > extent {
            return Err(DeployError::OutOfRange { offset, length, extent });
        }

        let mut sorted: Vec<&Block> = self.blocks.iter().collect();
        sorted.sort_by_key(|b| b.target_addr);

        let mut out = vec![0u8; length];
        for block in sorted {
            let from = start.max(block.target_addr as u64);
            let to = end.min(block.end_addr());
            if from >= to {
                continue;
            }
            let src = (from - block.target_addr as u64) as usize;
            let dst = (from - start) as usize;
            let n = (to - from) as usize;
            out[dst..dst + n].copy_from_slice(&block.payload[src..src + n]);
        }

        Ok(out)
    }

    /// Merge containers into one, keeping input order
    ///
    /// Blocks keep their own flags, filenames and file sizes, so each input
    /// file stays identifiable. Indices are renumbered across the result.
    /// The family id comes from the first non-empty input; `policy` decides
    /// whether a later mismatch is an error.
    pub fn concat(files: Vec<BlockFile>, policy: FamilyIdPolicy) -> Result<BlockFile> {
        let mut family_id = None;
        for file in files.iter().filter(|f| !f.is_empty()) {
            match family_id {
                None => family_id = Some(file.family_id),
                Some(expected) if expected != file.family_id => {
                    if policy == FamilyIdPolicy::Strict {
                        return Err(DeployError::FamilyMismatch {
                            expected,
                            got: file.family_id,
                        });
                    }
                    tracing::debug!(
                        "Concatenating family {:#010x} into {:#010x}",
                        file.family_id,
                        expected
                    );
                }
                Some(_) => {}
            }
        }

        let mut merged = BlockFile::untagged().with_family_id(family_id.unwrap_or(0));
        for file in files {
            merged.blocks.extend(file.blocks);
        }
        merged.finalize();

        Ok(merged)
    }

    /// Wire form: every block's 512 bytes in index order
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.blocks.len() * BLOCK_SIZE);
        for block in &self.blocks {
            block.encode(&mut buf);
        }
        buf.freeze()
    }

    fn page_position(&mut self, page: u32) -> usize {
        if let Some(&pos) = self.pages.get(&page) {
            return pos;
        }

        let flags = if self.filename.is_some() {
            FLAG_FILE_CONTAINER
        } else if self.family_id != 0 {
            FLAG_FAMILY_ID_PRESENT
        } else {
            0
        };

        let pos = self.blocks.len();
        self.blocks
            .push(Block::page(page, flags, self.family_id, self.filename.clone()));
        self.pages.insert(page, pos);
        tracing::trace!("Allocated block {} at {:#x}", pos, page);
        pos
    }

    fn finalize(&mut self) {
        let total = self.blocks.len() as u32;
        let file_size = self.filename.as_ref().map(|_| self.file_size);
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.block_index = i as u32;
            block.total_blocks = total;
            if let Some(size) = file_size {
                block.file_size = size;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uf2::block::MAGIC_START0;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    fn indices(file: &BlockFile) -> Vec<u32> {
        file.blocks().iter().map(|b| b.block_index).collect()
    }

    #[test]
    fn test_new_container_is_empty() {
        let file = BlockFile::new("Projects/a.elf");
        assert_eq!(file.filename(), Some("Projects/a.elf"));
        assert!(file.is_empty());
        assert_eq!(file.extent(), 0);
        assert!(file.serialize().is_empty());
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut file = BlockFile::new("Projects/a.elf");
        let data = pattern(700, 3);
        file.write_bytes(0, &data).unwrap();

        assert_eq!(file.len(), 3);
        assert_eq!(file.read_bytes(0, 700).unwrap(), data);
        assert_eq!(file.file_size(), 700);
    }

    #[test]
    fn test_unaligned_write_spans_pages() {
        let mut file = BlockFile::untagged();
        let data = pattern(300, 9);
        file.write_bytes(0x1f0, &data).unwrap();

        assert_eq!(file.len(), 3);
        assert_eq!(file.blocks()[0].target_addr, 0x100);
        assert_eq!(file.blocks()[1].target_addr, 0x200);
        assert_eq!(file.blocks()[2].target_addr, 0x300);
        assert_eq!(file.read_bytes(0x1f0, 300).unwrap(), data);
    }

    #[test]
    fn test_non_overlapping_writes_roundtrip() {
        let mut file = BlockFile::untagged();
        let a = pattern(40, 1);
        let b = pattern(500, 2);
        let c = pattern(16, 3);
        file.write_bytes(0x1000, &b).unwrap();
        file.write_bytes(0, &a).unwrap();
        file.write_bytes(0x80, &c).unwrap();

        assert_eq!(file.read_bytes(0, 40).unwrap(), a);
        assert_eq!(file.read_bytes(0x1000, 500).unwrap(), b);
        assert_eq!(file.read_bytes(0x80, 16).unwrap(), c);
    }

    #[test]
    fn test_partial_page_is_zero_padded() {
        let mut file = BlockFile::untagged();
        file.write_bytes(4, &[1, 2, 3]).unwrap();

        assert_eq!(file.len(), 1);
        let page = file.read_bytes(0, PAGE_SIZE).unwrap();
        assert_eq!(&page[..8], &[0, 0, 0, 0, 1, 2, 3, 0]);
        assert!(page[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overwrite_last_writer_wins() {
        let mut file = BlockFile::untagged();
        file.write_bytes(0, &[0xAA; 16]).unwrap();
        file.write_bytes(8, &[0xBB; 4]).unwrap();

        assert_eq!(file.len(), 1);
        let bytes = file.read_bytes(0, 16).unwrap();
        assert_eq!(&bytes[..8], &[0xAA; 8]);
        assert_eq!(&bytes[8..12], &[0xBB; 4]);
        assert_eq!(&bytes[12..], &[0xAA; 4]);
    }

    #[test]
    fn test_gap_reads_as_zero() {
        let mut file = BlockFile::untagged();
        file.write_bytes(0, &[1]).unwrap();
        file.write_bytes(0x300, &[2]).unwrap();

        let bytes = file.read_bytes(0, 0x301).unwrap();
        assert_eq!(bytes[0], 1);
        assert!(bytes[0x100..0x300].iter().all(|&b| b == 0));
        assert_eq!(bytes[0x300], 2);
    }

    #[test]
    fn test_empty_write_is_range_error() {
        let mut file = BlockFile::untagged();
        let err = file.write_bytes(0, &[]).unwrap_err();
        assert!(matches!(err, DeployError::Range(_)));
        assert!(file.is_empty());
    }

    #[test]
    fn test_write_past_address_space_is_range_error() {
        let mut file = BlockFile::untagged();
        let err = file.write_bytes(u32::MAX - 2, &[0; 8]).unwrap_err();
        assert!(matches!(err, DeployError::Range(_)));
    }

    #[test]
    fn test_long_filename_rejected() {
        let mut file = BlockFile::new("x".repeat(MAX_FILENAME_LEN + 1));
        let err = file.write_bytes(0, &[1]).unwrap_err();
        assert!(matches!(err, DeployError::FilenameTooLong { .. }));
    }

    #[test]
    fn test_read_past_extent_is_out_of_range() {
        let mut file = BlockFile::untagged();
        file.write_bytes(0, &[1; 10]).unwrap();

        assert!(file.read_bytes(0, PAGE_SIZE).is_ok());
        let err = file.read_bytes(0, PAGE_SIZE + 1).unwrap_err();
        assert!(matches!(err, DeployError::OutOfRange { extent: 256, .. }));
        assert!(BlockFile::untagged().read_bytes(0, 1).is_err());
    }

    #[test]
    fn test_file_blocks_carry_name_and_size() {
        let mut file = BlockFile::new("Projects/a.rbf");
        file.write_bytes(0, &pattern(300, 0)).unwrap();

        for block in file.blocks() {
            assert_eq!(block.flags, FLAG_FILE_CONTAINER);
            assert_eq!(block.filename.as_deref(), Some("Projects/a.rbf"));
            assert_eq!(block.file_size, 300);
            assert_eq!(block.total_blocks, 2);
        }
    }

    #[test]
    fn test_concat_counts_and_renumbers() {
        let mut a = BlockFile::new("Projects/a.elf");
        a.write_bytes(0, &pattern(600, 1)).unwrap();
        let mut b = BlockFile::new("Projects/a.rbf");
        b.write_bytes(0, &pattern(100, 2)).unwrap();
        let (a_len, b_len) = (a.len(), b.len());

        let merged = BlockFile::concat(vec![a, b], FamilyIdPolicy::TakeFirst).unwrap();
        assert_eq!(merged.len(), a_len + b_len);
        assert_eq!(indices(&merged), (0..4).collect::<Vec<u32>>());
        assert!(merged.blocks().iter().all(|b| b.total_blocks == 4));
        assert_eq!(merged.blocks()[0].filename.as_deref(), Some("Projects/a.elf"));
        assert_eq!(merged.blocks()[3].filename.as_deref(), Some("Projects/a.rbf"));
        assert_eq!(merged.blocks()[0].file_size, 600);
        assert_eq!(merged.blocks()[3].file_size, 100);
        assert_eq!(merged.filename(), None);
    }

    #[test]
    fn test_concat_of_concat_stays_contiguous() {
        let mut a = BlockFile::untagged();
        a.write_bytes(0, &[1; 300]).unwrap();
        let mut b = BlockFile::untagged();
        b.write_bytes(0, &[2; 10]).unwrap();
        let first = BlockFile::concat(vec![a.clone(), b], FamilyIdPolicy::TakeFirst).unwrap();

        let again = BlockFile::concat(vec![first, a], FamilyIdPolicy::TakeFirst).unwrap();
        assert_eq!(again.len(), 5);
        assert_eq!(indices(&again), (0..5).collect::<Vec<u32>>());
    }

    #[test]
    fn test_concat_family_from_first_non_empty() {
        let empty = BlockFile::untagged().with_family_id(0x1111);
        let mut a = BlockFile::untagged().with_family_id(0x2222);
        a.write_bytes(0, &[1]).unwrap();
        let mut b = BlockFile::untagged().with_family_id(0x3333);
        b.write_bytes(0, &[2]).unwrap();

        let merged = BlockFile::concat(vec![empty, a, b], FamilyIdPolicy::TakeFirst).unwrap();
        assert_eq!(merged.family_id(), 0x2222);
        assert_eq!(merged.blocks()[1].family_id, 0x3333);
    }

    #[test]
    fn test_concat_strict_rejects_mismatch() {
        let mut a = BlockFile::untagged().with_family_id(0x2222);
        a.write_bytes(0, &[1]).unwrap();
        let mut b = BlockFile::untagged().with_family_id(0x3333);
        b.write_bytes(0, &[2]).unwrap();

        let err = BlockFile::concat(vec![a, b], FamilyIdPolicy::Strict).unwrap_err();
        assert!(matches!(
            err,
            DeployError::FamilyMismatch { expected: 0x2222, got: 0x3333 }
        ));
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let mut file = BlockFile::new("Projects/a.elf");
        file.write_bytes(0x40, &pattern(900, 5)).unwrap();

        let first = file.serialize();
        let second = file.serialize();
        assert_eq!(first, second);
        assert_eq!(first.len(), file.len() * BLOCK_SIZE);
        assert_eq!(u32::from_le_bytes([first[0], first[1], first[2], first[3]]), MAGIC_START0);
    }

    #[test]
    fn test_parse_serialized_file() {
        let mut file = BlockFile::untagged().with_family_id(0xE48B_FF56);
        let data = pattern(520, 4);
        file.write_bytes(0, &data).unwrap();

        let parsed = BlockFile::parse(&file.serialize()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.family_id(), 0xE48B_FF56);
        assert_eq!(parsed.read_bytes(0, 520).unwrap(), data);
        assert_eq!(parsed.serialize(), file.serialize());
    }

    #[test]
    fn test_parse_skips_garbage_chunks() {
        let mut file = BlockFile::untagged();
        file.write_bytes(0, &[7; 10]).unwrap();
        let mut raw = vec![0u8; BLOCK_SIZE];
        raw.extend_from_slice(&file.serialize());
        raw.extend_from_slice(&[1, 2, 3]);

        let parsed = BlockFile::parse(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.blocks()[0].block_index, 0);
    }

    #[test]
    fn test_parse_rejects_input_without_blocks() {
        assert!(BlockFile::parse(&[]).unwrap().is_empty());
        let err = BlockFile::parse(&[0u8; BLOCK_SIZE]).unwrap_err();
        assert!(matches!(err, DeployError::InvalidBlockFile(_)));
    }
}
