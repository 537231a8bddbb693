//! Domain types shared across the gateway: the inode descriptor exchanged
//! with the MS, the manifest served to clients, and conversions to/from the
//! generated protobuf wire types in [`crate::proto`].

use crate::proto;

/// `FILE` or `DIR`, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InodeType {
    File,
    Dir,
}

impl From<InodeType> for proto::InodeType {
    fn from(t: InodeType) -> Self {
        match t {
            InodeType::File => proto::InodeType::File,
            InodeType::Dir => proto::InodeType::Dir,
        }
    }
}

impl From<proto::InodeType> for InodeType {
    fn from(t: proto::InodeType) -> Self {
        match t {
            proto::InodeType::File => InodeType::File,
            proto::InodeType::Dir => InodeType::Dir,
        }
    }
}

/// `(sec, nsec)` timestamp pair, per spec §3.
pub type Timespec = (i64, i32);

/// The unit of exchange with the MS (spec §3, `InodeMeta`).
#[derive(Debug, Clone, PartialEq)]
pub struct InodeMeta {
    pub file_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub parent_name: String,
    pub kind: InodeType,
    pub mode: u32,
    pub coordinator: u64,
    pub owner: u64,
    pub volume: u64,
    pub ctime: Timespec,
    pub mtime: Timespec,
    pub version: u64,
    pub write_nonce: u64,
    pub generation: u64,
    pub size: u64,
    pub max_read_freshness_ms: u64,
    pub max_write_freshness_ms: u64,
    pub url: String,
}

impl InodeMeta {
    /// A zeroed descriptor for a not-yet-published file, per the publish
    /// path in the MS client (spec §4.F `create`).
    pub fn new_file(parent_id: u64, name: impl Into<String>, parent_name: impl Into<String>, mode: u32) -> Self {
        InodeMeta {
            file_id: 0,
            parent_id,
            name: name.into(),
            parent_name: parent_name.into(),
            kind: InodeType::File,
            mode,
            coordinator: 0,
            owner: 0,
            volume: 0,
            ctime: (0, 0),
            mtime: (0, 0),
            version: 0,
            write_nonce: 0,
            generation: 0,
            size: 0,
            max_read_freshness_ms: 0,
            max_write_freshness_ms: 0,
            url: String::new(),
        }
    }

    pub fn new_dir(parent_id: u64, name: impl Into<String>, parent_name: impl Into<String>, mode: u32) -> Self {
        let mut m = Self::new_file(parent_id, name, parent_name, mode);
        m.kind = InodeType::Dir;
        m
    }
}

impl From<&InodeMeta> for proto::InodeEntry {
    fn from(m: &InodeMeta) -> Self {
        proto::InodeEntry {
            file_id: m.file_id,
            parent_id: m.parent_id,
            name: m.name.clone(),
            parent_name: m.parent_name.clone(),
            r#type: proto::InodeType::from(m.kind) as i32,
            mode: m.mode,
            coordinator: m.coordinator,
            owner: m.owner,
            volume: m.volume,
            ctime_sec: m.ctime.0,
            ctime_nsec: m.ctime.1,
            mtime_sec: m.mtime.0,
            mtime_nsec: m.mtime.1,
            version: m.version,
            write_nonce: m.write_nonce,
            generation: m.generation,
            size: m.size,
            max_read_freshness: m.max_read_freshness_ms,
            max_write_freshness: m.max_write_freshness_ms,
            url: m.url.clone(),
        }
    }
}

impl From<proto::InodeEntry> for InodeMeta {
    fn from(e: proto::InodeEntry) -> Self {
        let kind = proto::InodeType::try_from(e.r#type).unwrap_or(proto::InodeType::File).into();
        InodeMeta {
            file_id: e.file_id,
            parent_id: e.parent_id,
            name: e.name,
            parent_name: e.parent_name,
            kind,
            mode: e.mode,
            coordinator: e.coordinator,
            owner: e.owner,
            volume: e.volume,
            ctime: (e.ctime_sec, e.ctime_nsec),
            mtime: (e.mtime_sec, e.mtime_nsec),
            version: e.version,
            write_nonce: e.write_nonce,
            generation: e.generation,
            size: e.size,
            max_read_freshness_ms: e.max_read_freshness,
            max_write_freshness_ms: e.max_write_freshness,
            url: e.url,
        }
    }
}

/// One block descriptor inside a [`Manifest`] (spec §3).
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub block_id: u64,
    pub block_version: u64,
    pub hash: [u8; 32],
}

/// Per-file manifest served on a manifest request (spec §3, §4.G.1).
#[derive(Debug, Clone)]
pub struct Manifest {
    pub volume: u64,
    pub gateway: u64,
    pub file_id: u64,
    pub version: u64,
    pub size: u64,
    pub mtime: Timespec,
    pub file_url: String,
    pub blocks: Vec<BlockDescriptor>,
}

impl Manifest {
    /// Number of blocks covering `size` bytes at `blocksize` bytes per
    /// block, per spec §4.G.1 (`ceil(size / blocksize)`).
    pub fn block_count(size: u64, blocksize: u64) -> u64 {
        if blocksize == 0 {
            return 0;
        }
        (size + blocksize - 1) / blocksize
    }
}

impl From<&BlockDescriptor> for proto::BlockDescriptorMsg {
    fn from(b: &BlockDescriptor) -> Self {
        proto::BlockDescriptorMsg { block_id: b.block_id, block_version: b.block_version, hash: b.hash.to_vec() }
    }
}

impl From<&Manifest> for proto::ManifestMsg {
    fn from(m: &Manifest) -> Self {
        proto::ManifestMsg {
            volume: m.volume,
            gateway: m.gateway,
            file_id: m.file_id,
            version: m.version,
            size: m.size,
            mtime_sec: m.mtime.0,
            mtime_nsec: m.mtime.1,
            file_url: m.file_url.clone(),
            blocks: m.blocks.iter().map(proto::BlockDescriptorMsg::from).collect(),
        }
    }
}
