//! [MODULE B] Block index.
//!
//! Maps `(fs_path, block_id) -> (start_row, start_byte_offset, end_row,
//! end_byte_offset)` for variable-length source records (spec §4.B),
//! grounded in `original_source/AG/drivers/sql/block-index.cpp`'s
//! map-of-vectors-of-locks shape. A per-file `RwLock` stands in for the
//! original's per-file `pthread_mutex_t`; reads take the shared side,
//! `update` takes the exclusive side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Soft capacity hint per file; files may grow past this for large sources,
/// matching the original's `reserve()`-then-grow behavior.
pub const MAX_INDEX_SIZE: usize = 1024;

/// `(start_row, start_byte_offset, end_row, end_byte_offset)`, per spec §3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub start_row: u64,
    pub start_byte_offset: u64,
    pub end_row: u64,
    pub end_byte_offset: u64,
}

type FileIndex = Arc<RwLock<Vec<Option<BlockIndexEntry>>>>;

/// Per-file block indices, keyed by `fs_path`.
///
/// The outer `Mutex` is the "map-of-maps lock" in spec §4.B: it only ever
/// guards the `HashMap` itself (inserting/removing a file's index), never
/// the per-file contents, so a long block scan on one file never blocks
/// index creation for another.
pub struct BlockIndex {
    files: Mutex<HashMap<String, FileIndex>>,
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIndex {
    pub fn new() -> Self {
        BlockIndex { files: Mutex::new(HashMap::new()) }
    }

    /// Returns a zeroed entry, per spec §4.B `alloc_entry()`.
    pub fn alloc_entry() -> BlockIndexEntry {
        BlockIndexEntry::default()
    }

    fn file_index(&self, file: &str) -> FileIndex {
        let mut files = self.files.lock();
        files
            .entry(file.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::with_capacity(MAX_INDEX_SIZE))))
            .clone()
    }

    /// Appends `entry` at `block_id`, sparsely growing with `None` holes if
    /// `block_id >= len`, per spec §4.B. Exclusive on the file's index.
    pub fn update(&self, file: &str, block_id: u64, entry: BlockIndexEntry) {
        let index = self.file_index(file);
        let mut list = index.write();
        let idx = block_id as usize;
        if idx >= list.len() {
            list.resize(idx + 1, None);
        }
        list[idx] = Some(entry);
    }

    /// Returns `None` if out of range or the file has no index yet. Shared
    /// lock on the file's index.
    pub fn get(&self, file: &str, block_id: u64) -> Option<BlockIndexEntry> {
        let files = self.files.lock();
        let index = files.get(file)?.clone();
        drop(files);
        let list = index.read();
        list.get(block_id as usize).copied().flatten()
    }

    /// Returns the highest populated block id and its entry.
    pub fn get_last(&self, file: &str) -> Option<(u64, BlockIndexEntry)> {
        let files = self.files.lock();
        let index = files.get(file)?.clone();
        drop(files);
        let list = index.read();
        list.iter()
            .enumerate()
            .rev()
            .find_map(|(id, e)| e.map(|e| (id as u64, e)))
    }

    /// Drops the entire per-file vector; subsequent `get` returns `None`
    /// until the next `update`, per spec §4.B.
    pub fn invalidate(&self, file: &str) {
        self.files.lock().remove(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_on_missing_file_is_none() {
        let idx = BlockIndex::new();
        assert_eq!(idx.get("nope", 0), None);
    }

    #[test]
    fn update_then_get_round_trips() {
        let idx = BlockIndex::new();
        let e = BlockIndexEntry { start_row: 1, start_byte_offset: 2, end_row: 3, end_byte_offset: 4 };
        idx.update("f", 0, e);
        assert_eq!(idx.get("f", 0), Some(e));
    }

    #[test]
    fn out_of_range_block_id_is_none() {
        let idx = BlockIndex::new();
        idx.update("f", 0, BlockIndex::alloc_entry());
        assert_eq!(idx.get("f", 5), None);
    }

    #[test]
    fn sparse_grow_leaves_holes() {
        let idx = BlockIndex::new();
        let e = BlockIndexEntry { start_row: 9, start_byte_offset: 0, end_row: 9, end_byte_offset: 0 };
        idx.update("f", 3, e);
        assert_eq!(idx.get("f", 0), None);
        assert_eq!(idx.get("f", 3), Some(e));
    }

    #[test]
    fn get_last_returns_highest_populated_id() {
        let idx = BlockIndex::new();
        idx.update("f", 0, BlockIndex::alloc_entry());
        idx.update("f", 4, BlockIndexEntry { start_row: 1, ..Default::default() });
        let (id, entry) = idx.get_last("f").unwrap();
        assert_eq!(id, 4);
        assert_eq!(entry.start_row, 1);
    }

    #[test]
    fn invalidate_clears_the_file() {
        let idx = BlockIndex::new();
        idx.update("f", 0, BlockIndex::alloc_entry());
        idx.invalidate("f");
        assert_eq!(idx.get("f", 0), None);
        assert_eq!(idx.get_last("f"), None);
    }

    #[test]
    fn concurrent_updates_to_distinct_files_do_not_deadlock() {
        let idx = Arc::new(BlockIndex::new());
        let mut handles = vec![];
        for i in 0..8 {
            let idx = idx.clone();
            handles.push(thread::spawn(move || {
                let file = format!("file-{i}");
                for b in 0..50u64 {
                    idx.update(&file, b, BlockIndexEntry { start_row: b, ..Default::default() });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            let file = format!("file-{i}");
            let (id, _) = idx.get_last(&file).unwrap();
            assert_eq!(id, 49);
        }
    }
}
