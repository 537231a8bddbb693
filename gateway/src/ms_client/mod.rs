//! [MODULE F] MS client — the hard part.
//!
//! Batched, deadline-scheduled upload of inode mutations to the Metadata
//! Service; synchronous `create`/`mkdir`/`delete`/`update` RPCs;
//! volume-metadata fetch; single-flight discipline with exponential
//! backoff on both the read and write sessions (spec §4.F), grounded in
//! `original_source/common/ms-client.cpp`.

mod rpc;
mod uploader;

pub use rpc::UpdateOp;
pub use uploader::PendingUpdate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rand::Rng;
use thiserror::Error;

use crate::proto;
use crate::types::InodeMeta;

/// Error taxonomy for the MS client, per spec §7: CURL/network failures are
/// transient and retried by the uploader's deadline loop; logical MS errors
/// (HTTP 202) and protocol errors (any other non-200/202 status, or a
/// protobuf parse failure) are surfaced and never retried here.
#[derive(Debug, Error)]
pub enum MsError {
    #[error("transient network error: {0}")]
    Transient(#[from] reqwest::Error),
    #[error("logical MS error: {0}")]
    Logical(i64),
    #[error("protocol error: HTTP {0}")]
    Protocol(u16),
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Process-level configuration for talking to the MS.
#[derive(Debug, Clone)]
pub struct MsConfig {
    pub ms_url: String,
    pub gateway_id: u64,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
}

/// Cached volume parameters fetched via [`MsClient::get_volume_metadata`].
#[derive(Debug, Clone, Default)]
pub struct VolumeParams {
    pub version: u64,
    pub requester_id: u64,
    pub owner_id: u64,
    pub volume_id: u64,
    pub blocksize: u64,
    pub replica_urls: Vec<String>,
}

impl From<proto::VolumeMetadata> for VolumeParams {
    fn from(md: proto::VolumeMetadata) -> Self {
        VolumeParams {
            version: md.version,
            requester_id: md.requester_id,
            owner_id: md.owner_id,
            volume_id: md.volume_id,
            blocksize: md.blocksize,
            replica_urls: md.replica_urls,
        }
    }
}

/// Timings sampled from MS response headers, per spec §4.F / §6.
#[derive(Debug, Default, Clone)]
pub struct Timing {
    pub volume_time_ns: u64,
    pub ug_time_ns: u64,
    pub total_time_ns: u64,
    pub resolve_time_ns: u64,
    pub create_times_ns: Vec<u64>,
    pub update_times_ns: Vec<u64>,
    pub delete_times_ns: Vec<u64>,
}

impl Timing {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Timing {
        let int = |name: &str| -> u64 {
            headers.get(name).and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok()).unwrap_or(0)
        };
        let csv = |name: &str| -> Vec<u64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.split(',').filter_map(|x| x.trim().parse().ok()).collect())
                .unwrap_or_default()
        };
        Timing {
            volume_time_ns: int("X-Volume-Time"),
            ug_time_ns: int("X-UG-Time"),
            total_time_ns: int("X-Total-Time"),
            resolve_time_ns: int("X-Resolve-Time"),
            create_times_ns: csv("X-Create-Times"),
            update_times_ns: csv("X-Update-Times"),
            delete_times_ns: csv("X-Delete-Times"),
        }
    }
}

/// Deterministic 64-bit fingerprint of an `fs_path`, per spec GLOSSARY.
pub fn fingerprint(path: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in path.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub(crate) struct PendingState {
    pub(crate) updates: std::collections::HashMap<u64, PendingUpdate>,
    /// `(deadline_ms, fp)` pairs, ordered by deadline. A plain
    /// `BTreeMap<deadline, fp>` can only hold one fingerprint per
    /// millisecond; keying by the pair instead lets colliding deadlines
    /// (the common case when many map entries are published in the same
    /// tick) coexist without clobbering each other.
    pub(crate) deadlines: std::collections::BTreeSet<(u64, u64)>,
    pub(crate) fp_to_deadline: std::collections::HashMap<u64, u64>,
}

impl PendingState {
    fn new() -> Self {
        PendingState {
            updates: std::collections::HashMap::new(),
            deadlines: std::collections::BTreeSet::new(),
            fp_to_deadline: std::collections::HashMap::new(),
        }
    }
}

/// The MS client: two long-lived blocking HTTP sessions plus the pending
/// update set and deadline queue for deferred mutations, per spec §4.F.
pub struct MsClient {
    pub(crate) config: MsConfig,
    pub(crate) read_client: reqwest::blocking::Client,
    pub(crate) write_client: reqwest::blocking::Client,
    session_lock: Mutex<()>,
    downloading: AtomicBool,
    uploading: AtomicBool,
    pub(crate) read_timing: Mutex<Timing>,
    pub(crate) write_timing: Mutex<Timing>,
    pub(crate) volume: RwLock<VolumeParams>,
    pub(crate) pending: Mutex<PendingState>,
    pub(crate) cv: Condvar,
    pub(crate) running: AtomicBool,
    pub(crate) uploader_running: AtomicBool,
    uploader_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MsClient {
    pub fn new(config: MsConfig) -> Result<Arc<Self>, MsError> {
        let build = |timeout: Duration| {
            reqwest::blocking::Client::builder()
                .connect_timeout(config.connect_timeout)
                .timeout(timeout)
                .build()
        };
        let read_client = build(config.transfer_timeout)?;
        let write_client = build(config.transfer_timeout)?;
        Ok(Arc::new(MsClient {
            config,
            read_client,
            write_client,
            session_lock: Mutex::new(()),
            downloading: AtomicBool::new(false),
            uploading: AtomicBool::new(false),
            read_timing: Mutex::new(Timing::default()),
            write_timing: Mutex::new(Timing::default()),
            volume: RwLock::new(VolumeParams::default()),
            pending: Mutex::new(PendingState::new()),
            cv: Condvar::new(),
            running: AtomicBool::new(false),
            uploader_running: AtomicBool::new(false),
            uploader_handle: Mutex::new(None),
        }))
    }

    pub fn volume_params(&self) -> VolumeParams {
        self.volume.read().clone()
    }

    pub fn read_timing(&self) -> Timing {
        self.read_timing.lock().clone()
    }

    pub fn write_timing(&self) -> Timing {
        self.write_timing.lock().clone()
    }

    /// Exponential-backoff single-flight discipline, per spec §4.F: acquire
    /// the client lock, then while the flag is set, release it and sleep
    /// `delay = (delay + rand()%1000) * 2` microseconds before retrying.
    fn acquire_slot(&self, flag: &AtomicBool) {
        let mut guard = self.session_lock.lock();
        let mut delay: u64 = 0;
        while flag.load(Ordering::SeqCst) {
            drop(guard);
            let jitter = rand::thread_rng().gen_range(0..1000u64);
            delay = (delay + jitter) * 2;
            thread::sleep(Duration::from_micros(delay));
            guard = self.session_lock.lock();
        }
        flag.store(true, Ordering::SeqCst);
        drop(guard);
    }

    fn release_slot(flag: &AtomicBool) {
        flag.store(false, Ordering::SeqCst);
    }

    /// `GET {ms_url}/VOLUME/{name}` with the volume-secret header, per spec
    /// §4.F / §6. Caches the resulting version and blocksize.
    pub fn get_volume_metadata(&self, volume_name: &str, secret: &str) -> Result<VolumeParams, MsError> {
        use prost::Message;

        self.acquire_slot(&self.downloading);
        let url = format!("{}/VOLUME/{}", self.config.ms_url, volume_name);
        let result = self
            .read_client
            .get(&url)
            .header("X-Volume-Secret", secret)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send();
        Self::release_slot(&self.downloading);

        let resp = result?;
        let status = resp.status();
        *self.read_timing.lock() = Timing::from_headers(resp.headers());
        if status.as_u16() != 200 {
            return Err(MsError::Protocol(status.as_u16()));
        }
        let bytes = resp.bytes()?;
        let md = proto::VolumeMetadata::decode(bytes)?;
        let params = VolumeParams::from(md);
        *self.volume.write() = params.clone();
        Ok(params)
    }

    /// `GET {ms_url}/FILE/{volume}/{path}?lastmod=...` with
    /// `X-MS-Lastmod`, per spec §4.F / §6. Entries whose `coordinator`
    /// names this gateway are rewritten to a local-FS URL.
    pub fn resolve_path(&self, path: &str, lastmod: (i64, i32)) -> Result<(Vec<InodeMeta>, Vec<InodeMeta>), MsError> {
        use prost::Message;

        self.acquire_slot(&self.downloading);
        let volume = self.volume.read().volume_id;
        let url = format!("{}/FILE/{}{}?lastmod={}.{}", self.config.ms_url, volume, path, lastmod.0, lastmod.1);
        let result = self
            .read_client
            .get(&url)
            .header("X-MS-Lastmod", format!("{}.{}", lastmod.0, lastmod.1))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send();
        Self::release_slot(&self.downloading);

        let resp = result?;
        let status = resp.status();
        *self.read_timing.lock() = Timing::from_headers(resp.headers());
        if status.as_u16() != 200 {
            return Err(MsError::Protocol(status.as_u16()));
        }
        let bytes = resp.bytes()?;
        let reply = proto::Reply::decode(bytes)?;
        if reply.error != 0 {
            return Err(MsError::Logical(reply.error as i64));
        }

        let mut entries_dir: Vec<InodeMeta> = reply.entries_dir.into_iter().map(InodeMeta::from).collect();
        let mut entries_base: Vec<InodeMeta> = reply.entries_base.into_iter().map(InodeMeta::from).collect();
        for entry in entries_dir.iter_mut().chain(entries_base.iter_mut()) {
            self.rewrite_local_url(entry);
        }
        Ok((entries_dir, entries_base))
    }

    fn rewrite_local_url(&self, entry: &mut InodeMeta) {
        if entry.coordinator == self.config.gateway_id {
            entry.url = format!("file://{}", entry.name);
        }
    }

    /// Process exit code `1` on fatal MS initialization failure, per spec
    /// §6/§7 ("failed volume metadata fetch at startup: the process exits
    /// non-zero").
    pub fn fetch_startup_volume_metadata(&self, volume_name: &str, secret: &str) -> Result<VolumeParams, MsError> {
        self.get_volume_metadata(volume_name, secret)
    }
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_path_sensitive() {
        assert_eq!(fingerprint("/a/b"), fingerprint("/a/b"));
        assert_ne!(fingerprint("/a/b"), fingerprint("/a/c"));
    }
}
