//! On-disk data structures, encoded and decoded explicitly byte by byte
//! so the format never depends on in-memory layout or alignment.

pub mod node;
pub mod superblock;

pub use node::NodeRecord;
pub use superblock::Superblock;

/// Block 0 signature, "FLAT" read as a little-endian u32.
pub const SUPERBLOCK_MAGIC: u32 = 0x5441_4C46;

/// Node header signature, "FILE" read as a little-endian u32.
pub const NODE_MAGIC: u32 = 0x454C_4946;
