//! Flat, block-addressed file system engine for small raw storage media.
//!
//! The volume is divided into fixed 512-byte blocks: a checksummed
//! superblock at block 0, two mirrored allocation bitmaps, and a dense
//! array of fixed-size node runs. Each node run starts with a checksummed
//! header block (name, size, timestamps, owner, mode) followed by the
//! payload blocks. Consistency is restored at mount by cross-checking the
//! bitmap mirrors against the node headers.
#![allow(clippy::cargo_common_metadata)]

pub mod bitmap;
pub mod checksum;
pub mod device;
mod error;
pub mod format;
pub mod fs;
pub mod index;
pub mod layout;

pub use device::{BlockDevice, Disk};
pub use error::{FsError, FsResult, SuperblockFault};
pub use format::{FormatOptions, FormatSummary, format};
pub use fs::{DirEntry, FileHandle, FlatFs, MountOptions, NodeMeta, VolumeStats};

/// Fixed block size of the on-disk format, set at format time and never
/// renegotiated.
pub const BLOCK_SIZE: usize = 512;

/// Allocation bits carried by one bitmap block.
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// Longest node name the header block can hold.
pub const MAX_NAME_LEN: usize = BLOCK_SIZE - layout::node::NAME_OFFSET;

/// Mask selecting the file-type bits of a node mode.
pub const MODE_TYPE_MASK: u32 = 0o170_000;

/// File-type bits of a regular file.
pub const MODE_REGULAR: u32 = 0o100_000;
