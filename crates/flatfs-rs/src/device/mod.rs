//! Block-granular device access: the trait the engine consumes and a
//! memory-mapped image file implementation of it.


use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::BLOCK_SIZE;

/// Synchronous, block-addressed storage. `buf` lengths must be a whole
/// number of blocks; `address` is a block number, not a byte offset.
pub trait BlockDevice {
    /// Total number of blocks the device exposes.
    fn block_count(&self) -> u32;

    /// Reads `buf.len() / BLOCK_SIZE` blocks starting at `address`.
    ///
    /// # Errors
    /// Returns an error if the range falls outside the device or the
    /// transfer fails.
    fn read_blocks(&self, address: u32, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf.len() / BLOCK_SIZE` blocks starting at `address`.
    ///
    /// # Errors
    /// Returns an error if the range falls outside the device or the
    /// transfer fails.
    fn write_blocks(&mut self, address: u32, buf: &[u8]) -> io::Result<()>;

    /// Pushes any buffered writes down to the medium.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    fn flush(&self) -> io::Result<()>;
}

/// A volume image file mapped into memory, the reference [`BlockDevice`].
pub struct Disk {
    path: PathBuf,
    map: MmapMut,
    blocks: u32,
    // Held so the mapping outlives any handle duplication on the path.
    _file: File,
}

impl Disk {
    /// Opens an existing image whose length is a whole number of blocks.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or mapped, or if its
    /// length is not block-aligned.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Self::map(path, file, len)
    }

    /// Creates (or truncates) an image of `blocks` blocks.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created, sized, or mapped.
    pub fn create(path: impl AsRef<Path>, blocks: u32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let len = u64::from(blocks) * BLOCK_SIZE as u64;
        file.set_len(len)?;
        Self::map(path, file, len)
    }

    fn map(path: PathBuf, file: File, len: u64) -> io::Result<Self> {
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image length {len} is not a whole number of {BLOCK_SIZE}-byte blocks"),
            ));
        }
        let map_len = usize::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("image length {len} exceeds addressable size"),
            )
        })?;
        let map = unsafe { MmapOptions::new().len(map_len).map_mut(&file)? };
        let blocks = u32::try_from(len / BLOCK_SIZE as u64).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "image holds more blocks than a block address can reach",
            )
        })?;
        Ok(Self {
            path,
            map,
            blocks,
            _file: file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn byte_range(&self, address: u32, len: usize) -> io::Result<std::ops::Range<usize>> {
        if len % BLOCK_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("transfer length {len} is not a whole number of blocks"),
            ));
        }
        let start = address as usize * BLOCK_SIZE;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.map.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("block range {address}+{} outside the device", len / BLOCK_SIZE),
                )
            })?;
        Ok(start..end)
    }
}

impl BlockDevice for Disk {
    fn block_count(&self) -> u32 {
        self.blocks
    }

    fn read_blocks(&self, address: u32, buf: &mut [u8]) -> io::Result<()> {
        let range = self.byte_range(address, buf.len())?;
        buf.copy_from_slice(&self.map[range]);
        Ok(())
    }

    fn write_blocks(&mut self, address: u32, buf: &[u8]) -> io::Result<()> {
        let range = self.byte_range(address, buf.len())?;
        self.map[range].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}
