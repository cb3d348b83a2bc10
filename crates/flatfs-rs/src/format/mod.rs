//! Volume formatter: computes the geometry for a device and maximum
//! file size, then lays down the superblock and empty bitmaps.


use tracing::debug;

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::Superblock;
use crate::BLOCK_SIZE;

/// Formatting parameters.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// Largest payload a single file must be able to hold, in bytes.
    /// Rounded up to whole blocks; one extra block per node carries the
    /// header.
    pub max_file_size: u32,
    /// Skip zeroing the node header blocks. The bitmaps still start
    /// empty, so stale headers are only reachable through bit
    /// corruption, which the mount check cross-checks anyway.
    pub fast: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_file_size: BLOCK_SIZE as u32,
            fast: false,
        }
    }
}

/// What the formatter produced, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSummary {
    pub total_volume_blocks: u32,
    pub node_blocks: u32,
    pub bitmap_blocks: u32,
    pub total_files: u32,
    /// Payload capacity of a full-sized node, in bytes.
    pub file_capacity: u32,
}

/// Computes the volume geometry without touching the device.
///
/// The bitmap size depends on the file count and the file count depends
/// on how many blocks the bitmaps take, so the two are iterated to a
/// fixed point; it converges in a couple of rounds because growing the
/// bitmaps only ever shrinks the file count.
///
/// # Errors
/// Returns [`FsError::InvalidArgument`] for a zero `max_file_size` and
/// [`FsError::NoSpace`] when the device cannot hold the superblock, two
/// bitmaps, and at least one full node run.
pub fn compute_geometry(device_blocks: u32, options: &FormatOptions) -> FsResult<Superblock> {
    if options.max_file_size == 0 {
        return Err(FsError::InvalidArgument);
    }
    let node_blocks = options.max_file_size.div_ceil(BLOCK_SIZE as u32) + 1;

    let mut bitmap_blocks = 1u32;
    let (usable, total_files) = loop {
        let reserved = 1 + 2 * bitmap_blocks;
        let usable = device_blocks
            .checked_sub(reserved)
            .filter(|usable| *usable >= node_blocks)
            .ok_or(FsError::NoSpace)?;
        let total_files = usable.div_ceil(node_blocks);
        let needed = Superblock {
            total_volume_blocks: device_blocks,
            node_blocks,
            last_node_blocks: 0,
            bitmap_primary: 0,
            bitmap_secondary: 0,
            first_node_block: 0,
            total_files,
        }
        .bitmap_blocks();
        match needed.cmp(&bitmap_blocks) {
            std::cmp::Ordering::Equal => break (usable, total_files),
            std::cmp::Ordering::Greater => bitmap_blocks = needed,
            // Shrinking again means the size sits exactly on a bitmap
            // boundary with no consistent geometry; one block less of
            // capacity is not worth a special layout.
            std::cmp::Ordering::Less => return Err(FsError::NoSpace),
        }
    };

    Ok(Superblock {
        total_volume_blocks: device_blocks,
        node_blocks,
        last_node_blocks: usable - (total_files - 1) * node_blocks,
        bitmap_primary: 1,
        bitmap_secondary: device_blocks - bitmap_blocks,
        first_node_block: 1 + bitmap_blocks,
        total_files,
    })
}

/// Formats `device` in place. Any previous contents become unreachable;
/// unless `fast` is set, every node header block is also zeroed.
///
/// # Errors
/// Geometry errors from [`compute_geometry`] plus device I/O failures.
pub fn format<D: BlockDevice>(device: &mut D, options: &FormatOptions) -> FsResult<FormatSummary> {
    let sb = compute_geometry(device.block_count(), options)?;

    // Bitmaps go down before the superblock so a torn format never
    // yields a mountable header over garbage accounting.
    Bitmap::new(&sb).flush(device)?;

    if !options.fast {
        let zeroed = [0u8; BLOCK_SIZE];
        for node in 0..sb.total_files {
            device.write_blocks(sb.node_address(node), &zeroed)?;
        }
    }

    let mut block = [0u8; BLOCK_SIZE];
    sb.encode(&mut block);
    device.write_blocks(0, &block)?;
    device.flush()?;

    let summary = FormatSummary {
        total_volume_blocks: sb.total_volume_blocks,
        node_blocks: sb.node_blocks,
        bitmap_blocks: sb.bitmap_blocks(),
        total_files: sb.total_files,
        file_capacity: sb.node_capacity(0),
    };
    debug!(
        blocks = summary.total_volume_blocks,
        files = summary.total_files,
        capacity = summary.file_capacity,
        "formatted volume"
    );
    Ok(summary)
}
