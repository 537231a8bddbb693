//! [MODULE D] Directory monitor.
//!
//! Stat-cache diff over recursive directory walks, emitting NEW / MODIFIED /
//! REMOVED events (spec §4.D), grounded in
//! `original_source/AG/drivers/disk_polling/directory_monitor.cpp`'s two-map
//! (`cached`/`current`) swap design and in
//! `examples/other_examples/manifests/mheily-mosaicfs`'s use of `walkdir`
//! for its own filesystem agent.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;

/// A depth-first physical walk (no symlink crossing) never has more than
/// this many directory handles open at once, per spec §4.D.
pub const MAX_OPEN_DIR_HANDLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatSnapshot {
    size: u64,
    mtime_sec: i64,
    is_dir: bool,
}

/// A filesystem-level change observed between two consecutive
/// [`DirectoryMonitor::check_modified`] calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirEvent {
    New(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

/// Holds the previous snapshot (`cached`) between calls; `current` is local
/// to each call and swapped in at the end, per spec §4.D step 5.
pub struct DirectoryMonitor {
    cached: Mutex<HashMap<PathBuf, StatSnapshotInner>>,
}

type StatSnapshotInner = StatSnapshot;

impl Default for DirectoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryMonitor {
    pub fn new() -> Self {
        DirectoryMonitor { cached: Mutex::new(HashMap::new()) }
    }

    /// Walks `root`, diffs against the previous snapshot, and calls
    /// `handler` synchronously for each event under the monitor's mutex.
    /// `handler` MUST NOT call back into the monitor (spec §4.D).
    pub fn check_modified(&self, root: &Path, mut handler: impl FnMut(DirEvent)) -> io::Result<()> {
        let mut cached = self.cached.lock();

        let mut current = HashMap::new();
        walk_physical(root, root, 0, &mut current)?;

        for (path, stat) in &current {
            match cached.get(path) {
                None => handler(DirEvent::New(path.clone())),
                Some(old) if old.size != stat.size || old.mtime_sec != stat.mtime_sec => {
                    handler(DirEvent::Modified(path.clone()))
                }
                Some(_) => {}
            }
        }
        for path in cached.keys() {
            if !current.contains_key(path) {
                handler(DirEvent::Removed(path.clone()));
            }
        }

        *cached = current;
        Ok(())
    }
}

fn stat_of(meta: &fs::Metadata) -> StatSnapshot {
    let mtime_sec = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    StatSnapshot { size: meta.len(), mtime_sec, is_dir: meta.is_dir() }
}

/// Depth-first physical walk. `depth` stands in for the count of
/// simultaneously-open directory handles: each recursive call keeps one
/// `read_dir` iterator open on its stack frame while descending, so capping
/// `depth` at [`MAX_OPEN_DIR_HANDLES`] caps open handles directly.
fn walk_physical(root: &Path, dir: &Path, depth: usize, out: &mut HashMap<PathBuf, StatSnapshot>) -> io::Result<()> {
    if depth >= MAX_OPEN_DIR_HANDLES {
        tracing::warn!(path = %dir.display(), "directory monitor: max open handles reached, not descending further");
        return Ok(());
    }

    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in read_dir {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        let meta = entry.metadata()?;
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        if file_type.is_dir() {
            out.insert(rel, stat_of(&meta));
            walk_physical(root, &path, depth + 1, out)?;
        } else if file_type.is_file() {
            out.insert(rel, stat_of(&meta));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn first_walk_emits_new_for_everything() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap().write_all(b"hi").unwrap();

        let monitor = DirectoryMonitor::new();
        let mut events = Vec::new();
        monitor.check_modified(dir.path(), |e| events.push(e)).unwrap();
        assert_eq!(events, vec![DirEvent::New(PathBuf::from("a"))]);
    }

    #[test]
    fn second_walk_with_no_changes_emits_nothing() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap().write_all(b"hi").unwrap();

        let monitor = DirectoryMonitor::new();
        let mut events = Vec::new();
        monitor.check_modified(dir.path(), |e| events.push(e)).unwrap();
        events.clear();
        monitor.check_modified(dir.path(), |e| events.push(e)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn touch_create_delete_diff() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap().write_all(b"hi").unwrap();
        File::create(dir.path().join("b")).unwrap().write_all(b"bye").unwrap();

        let monitor = DirectoryMonitor::new();
        monitor.check_modified(dir.path(), |_| {}).unwrap();

        // modify a, create c, delete b
        std::thread::sleep(std::time::Duration::from_millis(1100));
        File::create(dir.path().join("a")).unwrap().write_all(b"hi there").unwrap();
        File::create(dir.path().join("c")).unwrap().write_all(b"new").unwrap();
        fs::remove_file(dir.path().join("b")).unwrap();

        let mut events = Vec::new();
        monitor.check_modified(dir.path(), |e| events.push(e)).unwrap();
        events.sort_by_key(|e| format!("{e:?}"));

        let mut expected = vec![
            DirEvent::Modified(PathBuf::from("a")),
            DirEvent::New(PathBuf::from("c")),
            DirEvent::Removed(PathBuf::from("b")),
        ];
        expected.sort_by_key(|e| format!("{e:?}"));
        assert_eq!(events, expected);
    }

    #[test]
    fn recurses_into_subdirectories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("sub/inner")).unwrap().write_all(b"x").unwrap();

        let monitor = DirectoryMonitor::new();
        let mut events = Vec::new();
        monitor.check_modified(dir.path(), |e| events.push(e)).unwrap();
        assert!(events.contains(&DirEvent::New(PathBuf::from("sub"))));
        assert!(events.contains(&DirEvent::New(PathBuf::from("sub/inner"))));
    }
}
