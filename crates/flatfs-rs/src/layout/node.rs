use crate::checksum::block_checksum;
use crate::error::{FsError, FsResult};
use crate::{BLOCK_SIZE, MAX_NAME_LEN};

use super::NODE_MAGIC;

/// Byte offset of the NUL-padded name field inside a node header block;
/// everything before it is fixed-width.
pub const NAME_OFFSET: usize = 40;

/// Decoded node header block: the metadata stored in the first block of
/// a node's run. Payload bytes follow in the remaining blocks of the run
/// and are not part of this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Creation time, seconds since the Unix epoch.
    pub ctime: u64,
    /// Last modification time, seconds since the Unix epoch.
    pub mtime: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Payload length in bytes.
    pub size: u32,
    pub name: String,
}

impl NodeRecord {
    /// Decodes and validates a node header block.
    ///
    /// # Errors
    /// Returns [`FsError::CorruptNode`] on a magic or checksum mismatch.
    /// That is the signal that a bitmap bit points at a torn or stale
    /// block.
    pub fn decode(block: &[u8]) -> FsResult<Self> {
        if block.len() < BLOCK_SIZE {
            return Err(FsError::CorruptNode);
        }
        let u32_at = |offset: usize| {
            u32::from_le_bytes(block[offset..offset + 4].try_into().unwrap_or_default())
        };
        let u64_at = |offset: usize| {
            u64::from_le_bytes(block[offset..offset + 8].try_into().unwrap_or_default())
        };
        if u32_at(0) != NODE_MAGIC || u32_at(4) != block_checksum(block) {
            return Err(FsError::CorruptNode);
        }
        let name_bytes = &block[NAME_OFFSET..BLOCK_SIZE];
        let name_len = name_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(MAX_NAME_LEN);
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();
        Ok(Self {
            ctime: u64_at(8),
            mtime: u64_at(16),
            mode: u32_at(24),
            uid: u32_at(28),
            gid: u32_at(32),
            size: u32_at(36),
            name,
        })
    }

    /// Encodes the record into `block`, stamping magic and checksum.
    ///
    /// # Errors
    /// Returns [`FsError::NameTooLong`] if the name does not fit the
    /// header block.
    pub fn encode(&self, block: &mut [u8; BLOCK_SIZE]) -> FsResult<()> {
        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        block.fill(0);
        block[0..4].copy_from_slice(&NODE_MAGIC.to_le_bytes());
        block[8..16].copy_from_slice(&self.ctime.to_le_bytes());
        block[16..24].copy_from_slice(&self.mtime.to_le_bytes());
        block[24..28].copy_from_slice(&self.mode.to_le_bytes());
        block[28..32].copy_from_slice(&self.uid.to_le_bytes());
        block[32..36].copy_from_slice(&self.gid.to_le_bytes());
        block[36..40].copy_from_slice(&self.size.to_le_bytes());
        block[NAME_OFFSET..NAME_OFFSET + name_bytes.len()].copy_from_slice(name_bytes);
        let crc = block_checksum(block);
        block[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}
