//! Mounted volume state and the operations on it.
//!
//! All metadata and payload I/O funnels through one volume lock; the
//! handle types are plain node references validated against the bitmap
//! on every call, so a handle held across a remove simply starts
//! reporting [`FsError::NotFound`].


use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::bitmap::{Bitmap, Mirror};
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult, SuperblockFault};
use crate::index::PathIndex;
use crate::layout::{NodeRecord, Superblock};
use crate::{BLOCK_SIZE, MODE_REGULAR, MODE_TYPE_MASK};

/// Mount-time knobs.
#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    /// Refuse every mutating operation and never write repairs back.
    pub read_only: bool,
    /// Run the full node cross-check even when the mirrors agree, and
    /// accept a superblock whose checksum fails as long as its fields
    /// survive geometry validation.
    pub force_check: bool,
    /// Capacity of the name lookup cache.
    pub index_slots: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            force_check: false,
            index_slots: 64,
        }
    }
}

/// Reference to an open node. Cheap to copy; revalidated on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    node: u32,
}

impl FileHandle {
    /// Node number behind this handle.
    #[must_use]
    pub fn node(self) -> u32 {
        self.node
    }
}

/// Decoded metadata of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMeta {
    pub node: u32,
    pub name: String,
    pub size: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub ctime: u64,
    pub mtime: u64,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub node: u32,
    pub name: String,
    pub size: u32,
    pub mode: u32,
    pub mtime: u64,
}

/// Volume-wide usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u32,
    pub total_volume_blocks: u32,
    pub total_files: u32,
    pub used_files: u32,
    pub free_files: u32,
    /// Payload capacity of a full-sized node, in bytes.
    pub file_capacity: u32,
}

struct FsState<D: BlockDevice> {
    device: D,
    sb: Superblock,
    bitmap: Bitmap,
    index: PathIndex,
    read_only: bool,
}

/// A mounted volume. Clones share the same state and lock.
pub struct FlatFs<D: BlockDevice> {
    state: Arc<Mutex<FsState<D>>>,
}

impl<D: BlockDevice> Clone for FlatFs<D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > crate::MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

impl<D: BlockDevice> FlatFs<D> {
    /// Mounts a volume, running the consistency check and writing back
    /// any repairs unless the mount is read-only.
    ///
    /// # Errors
    /// [`FsError::CorruptSuperblock`] when block 0 or both bitmap
    /// mirrors are unusable; I/O errors from the device.
    pub fn mount(mut device: D, options: MountOptions) -> FsResult<Self> {
        let mut block = vec![0u8; BLOCK_SIZE];
        device.read_blocks(0, &mut block)?;

        let sb = match Superblock::decode(&block) {
            Ok(sb) => sb,
            Err(SuperblockFault::BadChecksum) if options.force_check => {
                // The fields themselves may still be intact; geometry
                // validation below decides.
                warn!("superblock checksum mismatch, continuing under force_check");
                Superblock::decode_lenient(&block)?
            }
            Err(fault) => return Err(fault.into()),
        };
        sb.validate_geometry(device.block_count())?;

        let (bitmap, repaired) = Self::load_bitmaps(&device, &sb, &options)?;
        if repaired && !options.read_only {
            bitmap.flush(&mut device)?;
            device.flush()?;
        }

        if options.force_check && !options.read_only {
            let mut sb_block = [0u8; BLOCK_SIZE];
            sb.encode(&mut sb_block);
            if sb_block[..] != block[..] {
                device.write_blocks(0, &sb_block)?;
                device.flush()?;
                info!("rewrote superblock from validated fields");
            }
        }

        info!(
            blocks = sb.total_volume_blocks,
            files = sb.total_files,
            used = bitmap.used_count(),
            read_only = options.read_only,
            "mounted volume"
        );
        Ok(Self {
            state: Arc::new(Mutex::new(FsState {
                device,
                sb,
                bitmap,
                index: PathIndex::new(options.index_slots),
                read_only: options.read_only,
            })),
        })
    }

    /// Loads both mirrors, reconciles them, and cross-checks the result
    /// against the node headers when the mirrors disagree or a full
    /// check was requested. Returns the reconciled bitmap and whether it
    /// differs from what is on disk.
    fn load_bitmaps(device: &D, sb: &Superblock, options: &MountOptions) -> FsResult<(Bitmap, bool)> {
        let primary = Bitmap::load_mirror(device, sb, Mirror::Primary);
        let secondary = Bitmap::load_mirror(device, sb, Mirror::Secondary);
        let (mut bitmap, other, mut repaired) = match (primary, secondary) {
            (Ok(primary), Ok(secondary)) => (primary, Some(secondary), false),
            (Ok(primary), Err(_)) => {
                warn!("secondary bitmap mirror unreadable, recovering from primary");
                (primary, None, true)
            }
            (Err(_), Ok(secondary)) => {
                warn!("primary bitmap mirror unreadable, recovering from secondary");
                (secondary, None, true)
            }
            (Err(_), Err(_)) => {
                return Err(SuperblockFault::BitmapUnreadable.into());
            }
        };

        let mirrors_disagree = other
            .as_ref()
            .is_some_and(|secondary| secondary.words() != bitmap.words());
        if !mirrors_disagree && !options.force_check && !repaired {
            return Ok((bitmap, false));
        }

        // The preferred mirror decides which nodes are claimed. A set bit
        // whose header fails validation is cleared; a clear bit is never
        // resurrected, even when the other mirror claims the node and its
        // header looks plausible. A crash between the two mirror writes of
        // a remove leaves exactly that state, and the file must stay gone.
        if mirrors_disagree {
            warn!("bitmap mirrors disagree, cross-checking node headers");
        }
        let mut block = vec![0u8; BLOCK_SIZE];
        for node in 0..sb.total_files {
            if !bitmap.test(node)? {
                continue;
            }
            device.read_blocks(sb.node_address(node), &mut block)?;
            if NodeRecord::decode(&block).is_err() {
                repaired = true;
                bitmap.set(node, false)?;
                warn!(node, "cleared allocation bit over invalid node header");
            }
        }
        repaired = repaired || mirrors_disagree;
        Ok((bitmap, repaired))
    }

    fn lock(&self) -> MutexGuard<'_, FsState<D>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens an existing file by name.
    ///
    /// # Errors
    /// [`FsError::NotFound`] when no allocated node carries the name.
    pub fn open(&self, name: &str) -> FsResult<FileHandle> {
        validate_name(name)?;
        let mut state = self.lock();
        let node = state.find_node(name)?;
        Ok(FileHandle { node })
    }

    /// Looks a file up by name, optionally filtered by file-type bits:
    /// a nonzero `mode_mask` only matches nodes whose mode shares a bit
    /// with it.
    ///
    /// # Errors
    /// [`FsError::NotFound`].
    pub fn find(&self, name: &str, mode_mask: u32) -> FsResult<(FileHandle, NodeMeta)> {
        validate_name(name)?;
        let mut state = self.lock();
        let (node, record) = state.lookup(name, mode_mask)?;
        Ok((FileHandle { node }, meta(node, record)))
    }

    /// Creates a new empty file.
    ///
    /// # Errors
    /// [`FsError::AlreadyExists`] for a duplicate name,
    /// [`FsError::NoSpace`] when every node is allocated,
    /// [`FsError::ReadOnly`] on a read-only mount.
    pub fn create(&self, name: &str, mode: u32, uid: u32, gid: u32) -> FsResult<FileHandle> {
        validate_name(name)?;
        let mut state = self.lock();
        state.ensure_writable()?;
        if state.find_node(name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let node = state.bitmap.find_free()?;

        let now = now_secs();
        let record = NodeRecord {
            ctime: now,
            mtime: now,
            mode: (mode & !MODE_TYPE_MASK) | MODE_REGULAR,
            uid,
            gid,
            size: 0,
            name: name.to_string(),
        };
        let mut block = [0u8; BLOCK_SIZE];
        record.encode(&mut block)?;

        // Primary mirror, then the node block, then the secondary: at
        // every power-cut point the cross-check converges on either the
        // old state or the new one.
        state.bitmap.set(node, true)?;
        state.flush_bitmap_mirror(Mirror::Primary)?;
        let address = state.sb.node_address(node);
        state.device.write_blocks(address, &block)?;
        state.flush_bitmap_mirror(Mirror::Secondary)?;
        state.device.flush()?;

        state.index.insert(node, &record);
        debug!(node, name, "created file");
        Ok(FileHandle { node })
    }

    /// Removes a file by name. The node block is left in place; only the
    /// allocation bits change, which is what makes the bit the single
    /// source of truth for liveness.
    ///
    /// # Errors
    /// [`FsError::NotFound`], [`FsError::ReadOnly`].
    pub fn remove(&self, name: &str) -> FsResult<()> {
        validate_name(name)?;
        let mut state = self.lock();
        state.ensure_writable()?;
        let node = state.find_node(name)?;

        state.bitmap.set(node, false)?;
        state.flush_bitmap_mirror(Mirror::Primary)?;
        state.flush_bitmap_mirror(Mirror::Secondary)?;
        state.device.flush()?;

        state.index.remove(node);
        debug!(node, name, "removed file");
        Ok(())
    }

    /// Renames a file in place.
    ///
    /// # Errors
    /// [`FsError::NotFound`] for the old name,
    /// [`FsError::AlreadyExists`] for the new one,
    /// [`FsError::ReadOnly`].
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        validate_name(old)?;
        validate_name(new)?;
        let mut state = self.lock();
        state.ensure_writable()?;
        let node = state.find_node(old)?;
        if state.find_node(new).is_ok() {
            return Err(FsError::AlreadyExists);
        }

        let mut record = state.read_record(node)?;
        record.name = new.to_string();
        record.mtime = now_secs();
        state.write_record(node, &record)?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`; returns the
    /// byte count, zero at or past end of file.
    ///
    /// # Errors
    /// [`FsError::NotFound`] when the handle's node was removed,
    /// [`FsError::CorruptNode`] when the header fails validation.
    pub fn read(&self, handle: FileHandle, offset: u32, buf: &mut [u8]) -> FsResult<usize> {
        let mut state = self.lock();
        let record = state.live_record(handle)?;
        if offset >= record.size {
            return Ok(0);
        }
        let len = buf.len().min((record.size - offset) as usize);
        let base = state.sb.node_address(handle.node) + 1;
        state.transfer_payload(base, offset, &mut buf[..len], Direction::Read)?;
        Ok(len)
    }

    /// Writes `data` starting at `offset`; returns the byte count, which
    /// is short when the run's capacity cuts the write off.
    ///
    /// # Errors
    /// [`FsError::OutOfRange`] when `offset` lies past the reserved run,
    /// [`FsError::NoSpace`] when not a single byte fits,
    /// [`FsError::ReadOnly`], [`FsError::NotFound`],
    /// [`FsError::CorruptNode`].
    pub fn write(&self, handle: FileHandle, offset: u32, data: &[u8]) -> FsResult<usize> {
        let mut state = self.lock();
        state.ensure_writable()?;
        let mut record = state.live_record(handle)?;

        let capacity = state.sb.node_capacity(handle.node);
        if offset > capacity {
            return Err(FsError::OutOfRange);
        }
        let writable = data.len().min((capacity - offset) as usize);
        if writable == 0 {
            if data.is_empty() {
                return Ok(0);
            }
            return Err(FsError::NoSpace);
        }

        let base = state.sb.node_address(handle.node) + 1;
        if offset > record.size {
            // Writing past the current size must not expose whatever the
            // run held before; the gap reads back as zeroes.
            let mut gap = vec![0u8; (offset - record.size) as usize];
            state.transfer_payload(base, record.size, &mut gap, Direction::Write)?;
        }
        let mut data = data[..writable].to_vec();
        state.transfer_payload(base, offset, &mut data, Direction::Write)?;

        let end = offset + writable as u32;
        record.size = record.size.max(end);
        record.mtime = now_secs();
        state.write_record(handle.node, &record)?;
        state.device.flush()?;
        Ok(writable)
    }

    /// Sets the file size. Growing zero-fills the new range.
    ///
    /// # Errors
    /// [`FsError::OutOfRange`] when `size` exceeds the run capacity,
    /// [`FsError::ReadOnly`], [`FsError::NotFound`],
    /// [`FsError::CorruptNode`].
    pub fn truncate(&self, handle: FileHandle, size: u32) -> FsResult<()> {
        let mut state = self.lock();
        state.ensure_writable()?;
        let mut record = state.live_record(handle)?;
        if size > state.sb.node_capacity(handle.node) {
            return Err(FsError::OutOfRange);
        }
        if size > record.size {
            let base = state.sb.node_address(handle.node) + 1;
            let mut zeroes = vec![0u8; (size - record.size) as usize];
            state.transfer_payload(base, record.size, &mut zeroes, Direction::Write)?;
        }
        record.size = size;
        record.mtime = now_secs();
        state.write_record(handle.node, &record)?;
        state.device.flush()?;
        Ok(())
    }

    /// Metadata by name.
    pub fn stat(&self, name: &str) -> FsResult<NodeMeta> {
        validate_name(name)?;
        let mut state = self.lock();
        let node = state.find_node(name)?;
        let record = state.read_record(node)?;
        Ok(meta(node, record))
    }

    /// Metadata by handle.
    pub fn fstat(&self, handle: FileHandle) -> FsResult<NodeMeta> {
        let mut state = self.lock();
        let record = state.live_record(handle)?;
        Ok(meta(handle.node, record))
    }

    /// Updates permission bits; the file-type bits are preserved.
    pub fn chmod(&self, handle: FileHandle, mode: u32) -> FsResult<()> {
        let mut state = self.lock();
        state.ensure_writable()?;
        let mut record = state.live_record(handle)?;
        record.mode = (record.mode & MODE_TYPE_MASK) | (mode & !MODE_TYPE_MASK);
        state.write_record(handle.node, &record)?;
        state.device.flush()?;
        Ok(())
    }

    /// Updates ownership.
    pub fn chown(&self, handle: FileHandle, uid: u32, gid: u32) -> FsResult<()> {
        let mut state = self.lock();
        state.ensure_writable()?;
        let mut record = state.live_record(handle)?;
        record.uid = uid;
        record.gid = gid;
        state.write_record(handle.node, &record)?;
        state.device.flush()?;
        Ok(())
    }

    /// Snapshot of the flat namespace in ascending node order. Nodes
    /// whose headers fail validation are skipped with a warning rather
    /// than failing the whole listing.
    pub fn readdir(&self) -> FsResult<Vec<DirEntry>> {
        let mut state = self.lock();
        let nodes: Vec<u32> = state.bitmap.iter_used().collect();
        let mut entries = Vec::with_capacity(nodes.len());
        for node in nodes {
            match state.read_record(node) {
                Ok(record) => entries.push(DirEntry {
                    node,
                    name: record.name,
                    size: record.size,
                    mode: record.mode,
                    mtime: record.mtime,
                }),
                Err(FsError::CorruptNode) => {
                    warn!(node, "skipping allocated node with invalid header");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    /// Usage counters.
    pub fn statfs(&self) -> VolumeStats {
        let state = self.lock();
        let used = state.bitmap.used_count();
        VolumeStats {
            block_size: BLOCK_SIZE as u32,
            total_volume_blocks: state.sb.total_volume_blocks,
            total_files: state.sb.total_files,
            used_files: used,
            free_files: state.sb.total_files - used,
            file_capacity: state.sb.node_capacity(0),
        }
    }

    /// Flushes the bitmaps and the device, and decays the lookup cache.
    ///
    /// # Errors
    /// Device I/O failures. A no-op error-free on read-only mounts.
    pub fn sync(&self) -> FsResult<()> {
        let mut state = self.lock();
        let state = &mut *state;
        if !state.read_only {
            state.bitmap.flush(&mut state.device)?;
            state.device.flush()?;
        }
        state.index.decay();
        Ok(())
    }

    /// Syncs and releases this reference to the volume.
    ///
    /// # Errors
    /// Device I/O failures from the final sync.
    pub fn unmount(self) -> FsResult<()> {
        self.sync()
    }
}

enum Direction {
    Read,
    Write,
}

impl<D: BlockDevice> FsState<D> {
    fn ensure_writable(&self) -> FsResult<()> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    fn flush_bitmap_mirror(&mut self, mirror: Mirror) -> FsResult<()> {
        self.bitmap.flush_mirror(&mut self.device, mirror)
    }

    fn read_record(&mut self, node: u32) -> FsResult<NodeRecord> {
        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_blocks(self.sb.node_address(node), &mut block)?;
        NodeRecord::decode(&block)
    }

    /// Persists a node header and refreshes the lookup cache, which is
    /// what lets cache hits skip the device entirely.
    fn write_record(&mut self, node: u32, record: &NodeRecord) -> FsResult<()> {
        let mut block = [0u8; BLOCK_SIZE];
        record.encode(&mut block)?;
        self.device.write_blocks(self.sb.node_address(node), &block)?;
        self.index.insert(node, record);
        Ok(())
    }

    /// Record behind a handle, insisting the node is still allocated.
    fn live_record(&mut self, handle: FileHandle) -> FsResult<NodeRecord> {
        if !self.bitmap.test(handle.node)? {
            return Err(FsError::NotFound);
        }
        self.read_record(handle.node)
    }

    fn find_node(&mut self, name: &str) -> FsResult<u32> {
        self.lookup(name, 0).map(|(node, _)| node)
    }

    /// Name lookup: a cache hit answers from the cached header without
    /// touching the device; a miss scans the allocated nodes and caches
    /// the match. Every mutation path keeps the cache coherent, so the
    /// hit needs no verification read.
    fn lookup(&mut self, name: &str, mode_mask: u32) -> FsResult<(u32, NodeRecord)> {
        if let Some(hit) = self.index.find(name, mode_mask) {
            return Ok(hit);
        }

        let nodes: Vec<u32> = self.bitmap.iter_used().collect();
        for node in nodes {
            let Ok(record) = self.read_record(node) else {
                continue;
            };
            if record.name == name && (mode_mask == 0 || record.mode & mode_mask != 0) {
                self.index.insert(node, &record);
                return Ok((node, record));
            }
        }
        Err(FsError::NotFound)
    }

    /// Moves `buf.len()` payload bytes between `buf` and the run whose
    /// payload starts at block `base`. Full aligned blocks go in one
    /// transfer; edges read-modify-write.
    fn transfer_payload(
        &mut self,
        base: u32,
        offset: u32,
        buf: &mut [u8],
        direction: Direction,
    ) -> FsResult<()> {
        let block_size = BLOCK_SIZE as u32;
        let mut pos = offset;
        let mut done = 0usize;
        while done < buf.len() {
            let block_index = pos / block_size;
            let in_block = (pos % block_size) as usize;
            let remaining = buf.len() - done;
            if in_block == 0 && remaining >= BLOCK_SIZE {
                let full = remaining / BLOCK_SIZE * BLOCK_SIZE;
                let span = &mut buf[done..done + full];
                match direction {
                    Direction::Read => self.device.read_blocks(base + block_index, span)?,
                    Direction::Write => self.device.write_blocks(base + block_index, span)?,
                }
                pos += full as u32;
                done += full;
            } else {
                let chunk = remaining.min(BLOCK_SIZE - in_block);
                let mut block = [0u8; BLOCK_SIZE];
                self.device.read_blocks(base + block_index, &mut block)?;
                match direction {
                    Direction::Read => {
                        buf[done..done + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
                    }
                    Direction::Write => {
                        block[in_block..in_block + chunk].copy_from_slice(&buf[done..done + chunk]);
                        self.device.write_blocks(base + block_index, &block)?;
                    }
                }
                pos += chunk as u32;
                done += chunk;
            }
        }
        Ok(())
    }
}

fn meta(node: u32, record: NodeRecord) -> NodeMeta {
    NodeMeta {
        node,
        name: record.name,
        size: record.size,
        mode: record.mode,
        uid: record.uid,
        gid: record.gid,
        ctime: record.ctime,
        mtime: record.mtime,
    }
}
