//! In-memory allocation bitmap backed by two redundant on-disk mirrors.

#[cfg(test)]
mod bitmap_tests;

use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::Superblock;
use crate::BLOCK_SIZE;

const BITS_PER_WORD: u32 = u32::BITS;
const WORDS_PER_BLOCK: usize = BLOCK_SIZE / size_of::<u32>();

/// Which on-disk mirror a transfer targets. Flushing always goes
/// primary first, so a power cut mid-flush leaves the secondary as the
/// pre-update state and the mount check an unambiguous recovery anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    Primary,
    Secondary,
}

/// Bit *n* set means node *n* is allocated. The in-memory copy is the
/// working state; persistence happens only through an explicit flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
    total_nodes: u32,
    blocks: u32,
    primary: u32,
    secondary: u32,
}

impl Bitmap {
    /// An all-free bitmap sized for the superblock's node capacity.
    #[must_use]
    pub fn new(sb: &Superblock) -> Self {
        let blocks = sb.bitmap_blocks();
        Self {
            words: vec![0; blocks as usize * WORDS_PER_BLOCK],
            total_nodes: sb.total_files,
            blocks,
            primary: sb.bitmap_primary,
            secondary: sb.bitmap_secondary,
        }
    }

    /// Loads one mirror from the device.
    ///
    /// # Errors
    /// Propagates the device error; the caller decides whether the other
    /// mirror can stand in.
    pub fn load_mirror<D: BlockDevice>(
        device: &D,
        sb: &Superblock,
        mirror: Mirror,
    ) -> FsResult<Self> {
        let mut bitmap = Self::new(sb);
        let mut buf = vec![0u8; bitmap.blocks as usize * BLOCK_SIZE];
        device.read_blocks(bitmap.mirror_address(mirror), &mut buf)?;
        for (word, bytes) in bitmap.words.iter_mut().zip(buf.chunks_exact(4)) {
            *word = u32::from_le_bytes(bytes.try_into().unwrap_or_default());
        }
        Ok(bitmap)
    }

    /// Whether node `node` is allocated.
    ///
    /// # Errors
    /// Returns [`FsError::InvalidArgument`] for an out-of-range node.
    pub fn test(&self, node: u32) -> FsResult<bool> {
        let (word, mask) = self.locate(node)?;
        Ok(self.words[word] & mask != 0)
    }

    /// Flips node `node`'s bit in memory only.
    ///
    /// # Errors
    /// Returns [`FsError::InvalidArgument`] for an out-of-range node.
    pub fn set(&mut self, node: u32, used: bool) -> FsResult<()> {
        let (word, mask) = self.locate(node)?;
        if used {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
        Ok(())
    }

    /// First free node number, scanning word by word then bit by bit.
    ///
    /// # Errors
    /// Returns [`FsError::NoSpace`] when every node is allocated.
    pub fn find_free(&self) -> FsResult<u32> {
        for (i, word) in self.words.iter().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            for bit in 0..BITS_PER_WORD {
                let node = i as u32 * BITS_PER_WORD + bit;
                if node >= self.total_nodes {
                    return Err(FsError::NoSpace);
                }
                if *word & (1 << bit) == 0 {
                    return Ok(node);
                }
            }
        }
        Err(FsError::NoSpace)
    }

    /// Allocated node numbers in ascending order.
    pub fn iter_used(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.total_nodes)
            .filter(|node| self.words[(node / BITS_PER_WORD) as usize] & (1 << (node % BITS_PER_WORD)) != 0)
    }

    /// Number of allocated nodes.
    #[must_use]
    pub fn used_count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    /// Raw word view, used to compare mirrors at mount.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Writes the full bitmap to one mirror.
    ///
    /// # Errors
    /// Propagates the device error.
    pub fn flush_mirror<D: BlockDevice>(&self, device: &mut D, mirror: Mirror) -> FsResult<()> {
        let mut buf = vec![0u8; self.blocks as usize * BLOCK_SIZE];
        for (bytes, word) in buf.chunks_exact_mut(4).zip(self.words.iter()) {
            bytes.copy_from_slice(&word.to_le_bytes());
        }
        device.write_blocks(self.mirror_address(mirror), &buf)?;
        Ok(())
    }

    /// Persists the bitmap: primary mirror first, then secondary.
    ///
    /// # Errors
    /// Propagates the first device error; a failure between the two
    /// writes leaves exactly one mirror updated, which the mount check
    /// resolves.
    pub fn flush<D: BlockDevice>(&self, device: &mut D) -> FsResult<()> {
        self.flush_mirror(device, Mirror::Primary)?;
        self.flush_mirror(device, Mirror::Secondary)
    }

    fn mirror_address(&self, mirror: Mirror) -> u32 {
        match mirror {
            Mirror::Primary => self.primary,
            Mirror::Secondary => self.secondary,
        }
    }

    fn locate(&self, node: u32) -> FsResult<(usize, u32)> {
        if node >= self.total_nodes {
            return Err(FsError::InvalidArgument);
        }
        Ok(((node / BITS_PER_WORD) as usize, 1 << (node % BITS_PER_WORD)))
    }
}
