use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

/// Errors surfaced by the engine and its tooling.
///
/// A per-node validation failure ([`FsError::CorruptNode`]) aborts only
/// the call that hit it; the mounted volume stays usable. Only a
/// superblock fault is fatal to the mount itself.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("corrupt superblock: {0}")]
    CorruptSuperblock(#[from] SuperblockFault),

    /// A node header block failed its magic or checksum validation.
    #[error("node block failed validation")]
    CorruptNode,

    #[error("no free node available")]
    NoSpace,

    #[error("no node with the requested name")]
    NotFound,

    #[error("a node with the requested name already exists")]
    AlreadyExists,

    #[error("name exceeds the node header capacity")]
    NameTooLong,

    #[error("offset outside the node's reserved block run")]
    OutOfRange,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("volume is mounted read-only")]
    ReadOnly,

    #[error("block device i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why block 0 was rejected. Tooling picks between reformatting and a
/// `force_check` mount based on which fault it sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SuperblockFault {
    #[error("unknown file system signature")]
    BadMagic,

    #[error("header checksum mismatch")]
    BadChecksum,

    #[error("geometry fields inconsistent with the volume size")]
    BadGeometry,

    #[error("both bitmap mirrors unreadable")]
    BitmapUnreadable,
}
