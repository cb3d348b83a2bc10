use crate::checksum::block_checksum;
use crate::error::SuperblockFault;
use crate::{BITS_PER_BLOCK, BLOCK_SIZE};

use super::SUPERBLOCK_MAGIC;

/// Volume geometry persisted in block 0.
///
/// The checksum covers every field after itself; the two bitmap
/// addresses and the node region must describe disjoint ranges inside
/// the volume, which [`Superblock::validate_geometry`] enforces at
/// mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub total_volume_blocks: u32,
    /// Blocks reserved per node run (header block + payload blocks).
    pub node_blocks: u32,
    /// Run length of the highest node number when the volume does not
    /// divide evenly.
    pub last_node_blocks: u32,
    pub bitmap_primary: u32,
    pub bitmap_secondary: u32,
    pub first_node_block: u32,
    pub total_files: u32,
}

impl Superblock {
    /// Decodes block 0, verifying magic and checksum.
    ///
    /// # Errors
    /// Returns [`SuperblockFault::BadMagic`] or
    /// [`SuperblockFault::BadChecksum`].
    pub fn decode(block: &[u8]) -> Result<Self, SuperblockFault> {
        let decoded = Self::decode_lenient(block)?;
        let stored = u32::from_le_bytes(block[4..8].try_into().unwrap_or_default());
        if stored != block_checksum(block) {
            return Err(SuperblockFault::BadChecksum);
        }
        Ok(decoded)
    }

    /// Decodes block 0 checking only the magic, for the explicit
    /// `force_check` recovery path; the caller must still run
    /// [`Superblock::validate_geometry`] before trusting the fields.
    ///
    /// # Errors
    /// Returns [`SuperblockFault::BadMagic`].
    pub fn decode_lenient(block: &[u8]) -> Result<Self, SuperblockFault> {
        if block.len() < BLOCK_SIZE {
            return Err(SuperblockFault::BadGeometry);
        }
        let field = |offset: usize| {
            u32::from_le_bytes(block[offset..offset + 4].try_into().unwrap_or_default())
        };
        if field(0) != SUPERBLOCK_MAGIC {
            return Err(SuperblockFault::BadMagic);
        }
        Ok(Self {
            total_volume_blocks: field(8),
            node_blocks: field(12),
            last_node_blocks: field(16),
            bitmap_primary: field(20),
            bitmap_secondary: field(24),
            first_node_block: field(28),
            total_files: field(32),
        })
    }

    /// Encodes the superblock into `block`, stamping magic and checksum.
    pub fn encode(&self, block: &mut [u8; BLOCK_SIZE]) {
        block.fill(0);
        block[0..4].copy_from_slice(&SUPERBLOCK_MAGIC.to_le_bytes());
        block[8..12].copy_from_slice(&self.total_volume_blocks.to_le_bytes());
        block[12..16].copy_from_slice(&self.node_blocks.to_le_bytes());
        block[16..20].copy_from_slice(&self.last_node_blocks.to_le_bytes());
        block[20..24].copy_from_slice(&self.bitmap_primary.to_le_bytes());
        block[24..28].copy_from_slice(&self.bitmap_secondary.to_le_bytes());
        block[28..32].copy_from_slice(&self.first_node_block.to_le_bytes());
        block[32..36].copy_from_slice(&self.total_files.to_le_bytes());
        let crc = block_checksum(block);
        block[4..8].copy_from_slice(&crc.to_le_bytes());
    }

    /// Blocks occupied by one bitmap mirror.
    #[must_use]
    pub fn bitmap_blocks(&self) -> u32 {
        self.total_files.div_ceil(BITS_PER_BLOCK)
    }

    /// Checks every geometry invariant against the measured device size.
    ///
    /// # Errors
    /// Returns [`SuperblockFault::BadGeometry`] naming no further detail;
    /// the volume is either consistent or it is not mountable.
    pub fn validate_geometry(&self, device_blocks: u32) -> Result<(), SuperblockFault> {
        // Fields may come straight from an unchecksummed block under
        // force_check, so every derived quantity is computed checked.
        let bitmap_blocks = self.bitmap_blocks();
        let reserved = 1 + 2 * bitmap_blocks;

        let usable = self
            .total_volume_blocks
            .checked_sub(reserved)
            .ok_or(SuperblockFault::BadGeometry)?;
        let bitmap_capacity = bitmap_blocks
            .checked_mul(BITS_PER_BLOCK)
            .ok_or(SuperblockFault::BadGeometry)?;

        let consistent = self.total_volume_blocks == device_blocks
            && self.total_files >= 1
            && self.node_blocks >= 2
            && self.node_blocks <= usable
            && (1..=self.node_blocks).contains(&self.last_node_blocks)
            && self.total_files == usable.div_ceil(self.node_blocks)
            && self.total_files <= bitmap_capacity
            && (self.total_files - 1)
                .checked_mul(self.node_blocks)
                .and_then(|blocks| blocks.checked_add(self.last_node_blocks))
                == Some(usable);
        if !consistent {
            return Err(SuperblockFault::BadGeometry);
        }

        let region = |start: u32, len: u32| {
            start
                .checked_add(len)
                .map(|end| start..end)
                .ok_or(SuperblockFault::BadGeometry)
        };
        let node_region = region(self.first_node_block, usable)?;
        let primary = region(self.bitmap_primary, bitmap_blocks)?;
        let secondary = region(self.bitmap_secondary, bitmap_blocks)?;
        let regions = [&primary, &secondary, &node_region];
        for region in regions {
            if region.start == 0 || region.end > self.total_volume_blocks {
                return Err(SuperblockFault::BadGeometry);
            }
        }
        let disjoint = |a: &std::ops::Range<u32>, b: &std::ops::Range<u32>| {
            a.end <= b.start || b.end <= a.start
        };
        if !disjoint(&primary, &secondary)
            || !disjoint(&primary, &node_region)
            || !disjoint(&secondary, &node_region)
        {
            return Err(SuperblockFault::BadGeometry);
        }
        Ok(())
    }

    /// First block of node `node`'s run.
    #[must_use]
    pub fn node_address(&self, node: u32) -> u32 {
        self.first_node_block + node * self.node_blocks
    }

    /// Run length of node `node`, accounting for the undersized last run.
    #[must_use]
    pub fn node_run_blocks(&self, node: u32) -> u32 {
        if node + 1 == self.total_files {
            self.last_node_blocks
        } else {
            self.node_blocks
        }
    }

    /// Payload bytes node `node` can hold: its run minus the header block.
    #[must_use]
    pub fn node_capacity(&self, node: u32) -> u32 {
        (self.node_run_blocks(node) - 1) * BLOCK_SIZE as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        // 19-block volume: superblock, bitmap at 1, eight 2-block runs,
        // mirror at 18.
        Superblock {
            total_volume_blocks: 19,
            node_blocks: 2,
            last_node_blocks: 2,
            bitmap_primary: 1,
            bitmap_secondary: 18,
            first_node_block: 2,
            total_files: 8,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let sb = sample();
        let mut block = [0u8; BLOCK_SIZE];
        sb.encode(&mut block);
        let decoded = Superblock::decode(&block).expect("decode");
        assert_eq!(decoded, sb);
    }

    #[test]
    fn bad_magic_is_distinguished_from_bad_checksum() {
        let mut block = [0u8; BLOCK_SIZE];
        sample().encode(&mut block);

        let mut wrong_magic = block;
        wrong_magic[0] ^= 0xFF;
        assert_eq!(
            Superblock::decode(&wrong_magic),
            Err(SuperblockFault::BadMagic)
        );

        let mut wrong_field = block;
        wrong_field[10] ^= 0x01;
        assert_eq!(
            Superblock::decode(&wrong_field),
            Err(SuperblockFault::BadChecksum)
        );
        // The lenient path still accepts it for force_check recovery.
        assert!(Superblock::decode_lenient(&wrong_field).is_ok());
    }

    #[test]
    fn every_corrupted_field_byte_fails_the_checksum() {
        let mut block = [0u8; BLOCK_SIZE];
        sample().encode(&mut block);
        for i in 8..36 {
            let mut corrupted = block;
            corrupted[i] ^= 0x80;
            assert!(Superblock::decode(&corrupted).is_err(), "byte {i}");
        }
    }

    #[test]
    fn geometry_validation_accepts_the_reference_layout() {
        sample().validate_geometry(19).expect("valid geometry");
    }

    #[test]
    fn geometry_validation_rejects_size_mismatch() {
        // Device shrank under the header's feet.
        assert_eq!(
            sample().validate_geometry(16),
            Err(SuperblockFault::BadGeometry)
        );
    }

    #[test]
    fn geometry_validation_rejects_overlapping_regions() {
        let mut sb = sample();
        sb.bitmap_secondary = 3; // inside the node region
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));

        let mut sb = sample();
        sb.bitmap_secondary = sb.bitmap_primary;
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));
    }

    #[test]
    fn geometry_validation_rejects_overflowing_fields() {
        // Unchecksummed fields reach validation under force_check; the
        // arithmetic must reject them instead of wrapping or panicking.
        let mut sb = sample();
        sb.bitmap_primary = u32::MAX;
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));

        let mut sb = sample();
        sb.first_node_block = u32::MAX - 1;
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));

        let mut sb = sample();
        sb.total_files = u32::MAX;
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));
    }

    #[test]
    fn geometry_validation_rejects_wrong_file_count() {
        let mut sb = sample();
        sb.total_files = 7;
        assert_eq!(sb.validate_geometry(19), Err(SuperblockFault::BadGeometry));
    }

    #[test]
    fn node_addressing_uses_the_alternate_last_run() {
        let mut sb = sample();
        sb.total_volume_blocks = 18;
        sb.last_node_blocks = 1;
        sb.validate_geometry(18).expect("valid geometry");

        assert_eq!(sb.node_address(0), 2);
        assert_eq!(sb.node_address(3), 8);
        assert_eq!(sb.node_run_blocks(3), 2);
        assert_eq!(sb.node_run_blocks(7), 1);
        assert_eq!(sb.node_capacity(3), BLOCK_SIZE as u32);
        assert_eq!(sb.node_capacity(7), 0);
    }
}
