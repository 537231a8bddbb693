//! The `Engine`: owns the published set, the block index, the reversion
//! daemon, the MS client, and the backend registry, per spec §9 ("Global
//! mutable state ... becomes a single `Engine` value owning all caches;
//! handlers receive it by shared reference").

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::backend::{self, Backend};
use crate::block_index::BlockIndex;
use crate::error::GatewayError;
use crate::map_parser::MapEntry;
use crate::ms_client::{MsClient, UpdateOp};
use crate::reversion::{ReversionDaemon, RevertEntry};
use crate::types::InodeMeta;

/// Whether a directory-monitor `MODIFIED`/`REMOVED` event or a reversion
/// callback is allowed to push a mutation to the MS on its own, or whether
/// the publisher only ever creates and the MS is otherwise authoritative.
/// Spec §9 Open Question, resolved as a policy knob rather than a guess —
/// see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAuthority {
    /// The publisher issues `update`/`delete` RPCs on every observed change.
    PublisherAuthoritative,
    /// The publisher only ever `create`s; subsequent changes are left for
    /// the MS (or another path) to reconcile.
    MsAuthoritative,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub content_url: String,
    pub blocksize: u64,
    pub gateway_id: u64,
    pub owner_id: u64,
    pub volume_id: u64,
    /// How far in the future a freshly published entry's deferred MS
    /// mutation is deadlined, per spec §4.F `queue_update`.
    pub publish_deadline_ms: u64,
    /// `delta_ms` in spec §4.F's supersession rule.
    pub coalesce_delta_ms: u64,
    pub mutation_authority: MutationAuthority,
}

/// Aggregates components B, C, F and the backend registry behind one shared
/// value, per spec §9's design note.
pub struct Engine {
    pub config: EngineConfig,
    published: RwLock<HashMap<String, Arc<InodeMeta>>>,
    entries: RwLock<HashMap<String, MapEntry>>,
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
    pub block_index: BlockIndex,
    pub reversion: ReversionDaemon,
    pub ms_client: Arc<MsClient>,
}

impl Engine {
    pub fn new(config: EngineConfig, ms_client: Arc<MsClient>) -> Arc<Self> {
        Arc::new(Engine {
            config,
            published: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            backends: RwLock::new(HashMap::new()),
            block_index: BlockIndex::new(),
            reversion: ReversionDaemon::new(),
            ms_client,
        })
    }

    /// Publishes every entry parsed from the map document (spec §4.A / §9
    /// data flow: "the parser (A) loads a configuration used by F for
    /// initial publish and by C for scheduled revalidation"). Every path is
    /// treated as newly created; used once at startup, when the published
    /// set is known to be empty.
    pub fn publish_map_entries(self: &Arc<Self>, entries: BTreeMap<String, MapEntry>) -> Result<(), GatewayError> {
        for (path, entry) in entries {
            self.publish_new_entry(path, entry)?;
        }
        Ok(())
    }

    /// Reconciles the published set against a freshly re-parsed map
    /// document, for the `RCON` control opcode (spec §6: "reconfigure").
    /// Paths absent from the new document are torn down the same way a
    /// directory-monitor `REMOVED` event is; paths already published are
    /// updated in place (backend swapped, reversion re-registered against
    /// any new `reval_sec`) rather than re-created; genuinely new paths are
    /// published as `publish_map_entries` would at startup.
    pub fn reload_map_entries(self: &Arc<Self>, entries: BTreeMap<String, MapEntry>) -> Result<(), GatewayError> {
        let stale_paths: Vec<String> = self.entries.read().keys().filter(|p| !entries.contains_key(*p)).cloned().collect();
        for path in stale_paths {
            self.handle_directory_removed(&path);
            self.entries.write().remove(&path);
            self.backends.write().remove(&path);
            self.reversion.remove_entry(&path);
        }

        for (path, entry) in entries {
            if self.entries.read().contains_key(&path) {
                self.update_existing_entry(path, entry)?;
            } else {
                self.publish_new_entry(path, entry)?;
            }
        }
        Ok(())
    }

    fn publish_new_entry(self: &Arc<Self>, path: String, entry: MapEntry) -> Result<(), GatewayError> {
        let backend: Arc<dyn Backend> = Arc::from(backend::build(&entry.backend)?);
        self.backends.write().insert(path.clone(), backend);
        self.entries.write().insert(path.clone(), entry.clone());

        self.publish_path(&path, true)?;

        if let Some(reval_sec) = entry.reval_sec {
            self.register_reversion(path, reval_sec);
        }
        Ok(())
    }

    fn update_existing_entry(self: &Arc<Self>, path: String, entry: MapEntry) -> Result<(), GatewayError> {
        let backend: Arc<dyn Backend> = Arc::from(backend::build(&entry.backend)?);
        self.backends.write().insert(path.clone(), backend);
        self.entries.write().insert(path.clone(), entry.clone());

        self.publish_path(&path, false)?;

        self.reversion.remove_entry(&path);
        if let Some(reval_sec) = entry.reval_sec {
            self.register_reversion(path, reval_sec);
        }
        Ok(())
    }

    /// (Re)computes the `InodeMeta` for `path` from its backend's current
    /// size and installs it in the published set, then queues the
    /// corresponding MS mutation (spec §3 `DATA`, §4.F `queue_update`).
    fn publish_path(self: &Arc<Self>, path: &str, is_create: bool) -> Result<(), GatewayError> {
        let backend = self.backends.read().get(path).cloned().ok_or_else(|| GatewayError::Config(format!("publish_path: no backend registered for `{path}`")))?;
        let entry = self.entries.read().get(path).cloned().ok_or_else(|| GatewayError::Config(format!("publish_path: no map entry for `{path}`")))?;

        let size = backend.size()?;
        let now = now_timespec();
        let name = basename(path);
        let parent_name = dirname(path);

        let previous = self.published.read().get(path).cloned();
        let mut meta = InodeMeta::new_file(0, name, parent_name, entry.mode);
        meta.coordinator = self.config.gateway_id;
        meta.owner = self.config.owner_id;
        meta.volume = self.config.volume_id;
        meta.size = size;
        meta.mtime = now;
        meta.ctime = previous.as_ref().map(|p| p.ctime).unwrap_or(now);
        meta.file_id = previous.as_ref().map(|p| p.file_id).unwrap_or(0);
        meta.version = previous.as_ref().map(|p| p.version + 1).unwrap_or(0);
        meta.url = format!("{}{}", self.config.content_url, path);

        let meta = Arc::new(meta);
        self.published.write().insert(path.to_string(), meta.clone());

        let should_mutate = is_create || self.config.mutation_authority == MutationAuthority::PublisherAuthoritative;
        if should_mutate {
            let op = if is_create { UpdateOp::Create } else { UpdateOp::Update };
            self.ms_client.queue_update(path, (*meta).clone(), op, now_ms() + self.config.publish_deadline_ms, self.config.coalesce_delta_ms);
        }
        Ok(())
    }

    fn register_reversion(self: &Arc<Self>, path: String, reval_sec: u64) {
        let invalidate_engine = Arc::clone(self);
        let revert_engine = Arc::clone(self);
        let invalidate_path = path.clone();
        let revert_path = path.clone();

        let entry = RevertEntry::new(
            path,
            reval_sec,
            move || {
                invalidate_engine.block_index.invalidate(&invalidate_path);
                invalidate_engine.published.write().remove(&invalidate_path);
            },
            move || {
                if let Err(err) = revert_engine.publish_path(&revert_path, false) {
                    tracing::warn!(path = %revert_path, error = %err, "reversion: republish failed");
                }
            },
        );
        self.reversion.add_entry(entry);
    }

    /// Handles a `NEW`/`MODIFIED`/`REMOVED` event from the directory monitor
    /// for a path already present in the map (spec §9 data flow: "D feeds
    /// events into the publish path of F").
    pub fn handle_directory_new_or_modified(self: &Arc<Self>, path: &str) {
        if self.entries.read().contains_key(path) {
            if let Err(err) = self.publish_path(path, false) {
                tracing::warn!(path, error = %err, "directory monitor: republish failed");
            }
        }
    }

    pub fn handle_directory_removed(self: &Arc<Self>, path: &str) {
        if self.config.mutation_authority == MutationAuthority::PublisherAuthoritative {
            if let Some(meta) = self.published.read().get(path).cloned() {
                self.ms_client.queue_update(path, (*meta).clone(), UpdateOp::Delete, now_ms() + self.config.publish_deadline_ms, self.config.coalesce_delta_ms);
            }
        }
        self.published.write().remove(path);
        self.block_index.invalidate(path);
    }

    pub fn lookup(&self, fs_path: &str) -> Option<Arc<InodeMeta>> {
        self.published.read().get(fs_path).cloned()
    }

    pub fn backend_for(&self, fs_path: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().get(fs_path).cloned()
    }

    pub fn published_count(&self) -> usize {
        self.published.read().len()
    }
}

fn now_timespec() -> (i64, i32) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (now.as_secs() as i64, now.subsec_nanos() as i32)
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn basename(path: &str) -> String {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or("/").to_string()
}

fn dirname(path: &str) -> String {
    Path::new(path).parent().and_then(|p| p.to_str()).filter(|s| !s.is_empty()).unwrap_or("/").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_parser::BackendDescriptor;
    use crate::ms_client::MsConfig;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn test_engine() -> Arc<Engine> {
        let ms_client = MsClient::new(MsConfig {
            ms_url: "http://127.0.0.1:1".to_string(),
            gateway_id: 1,
            username: "u".to_string(),
            password: "p".to_string(),
            connect_timeout: Duration::from_millis(50),
            transfer_timeout: Duration::from_millis(50),
        })
        .unwrap();
        Engine::new(
            EngineConfig {
                content_url: "http://gw.example".to_string(),
                blocksize: 4096,
                gateway_id: 1,
                owner_id: 1,
                volume_id: 1,
                publish_deadline_ms: 60_000,
                coalesce_delta_ms: 500,
                mutation_authority: MutationAuthority::PublisherAuthoritative,
            },
            ms_client,
        )
    }

    #[test]
    fn publishing_an_entry_populates_the_published_set_and_queues_a_create() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let engine = test_engine();
        let mut entries = BTreeMap::new();
        entries.insert(
            "/foo/bar".to_string(),
            MapEntry {
                fs_path: "/foo/bar".to_string(),
                backend: BackendDescriptor::LocalFile(file.path().to_str().unwrap().to_string()),
                mode: 0o644,
                reval_sec: Some(3600),
            },
        );
        engine.publish_map_entries(entries).unwrap();

        let meta = engine.lookup("/foo/bar").unwrap();
        assert_eq!(meta.size, 12);
        assert_eq!(engine.ms_client.pending_len(), 1);
    }

    #[test]
    fn removed_event_clears_the_published_set_and_block_index() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();

        let engine = test_engine();
        let mut entries = BTreeMap::new();
        entries.insert(
            "/a".to_string(),
            MapEntry {
                fs_path: "/a".to_string(),
                backend: BackendDescriptor::LocalFile(file.path().to_str().unwrap().to_string()),
                mode: 0o644,
                reval_sec: None,
            },
        );
        engine.publish_map_entries(entries).unwrap();
        assert!(engine.lookup("/a").is_some());

        engine.handle_directory_removed("/a");
        assert!(engine.lookup("/a").is_none());
    }
}
