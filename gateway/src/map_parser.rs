//! [MODULE A] Path/Map parser.
//!
//! Parses the static configuration mapping external resources to filesystem
//! paths, permissions, and revalidation intervals (spec §4.A). The format is
//! a tagged line-oriented text document, following the original
//! `AG/drivers/sql/map-parser.cpp`'s own simple grammar rather than the
//! process-level TOML config in [`crate::config`]:
//!
//! ```text
//! path = /foo/bar
//! backend = file:/data/bar
//! permission = 644
//! reval_sec = 3600
//! ---
//! path = /foo/query
//! backend = sql:SELECT * FROM rows
//! permission = 444
//! reval_sec = *
//! ```
//!
//! Entries are separated by a line of three-or-more dashes. A malformed
//! entry fails the whole parse (atomic), per spec §4.A.

use std::collections::BTreeMap;
use std::fmt;

/// Where block/manifest requests for a published path are actually served
/// from, per spec §2 row G and §4.G.2 ("Dispatch on the entry's backend").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDescriptor {
    /// Local filesystem file, read with `lseek` + bounded reads.
    LocalFile(String),
    /// A shell command, re-spawned and read per block request.
    Shell(String),
    /// A SQL query, executed per block request (requires `sql-backend`).
    Sql(String),
}

impl BackendDescriptor {
    fn parse(raw: &str) -> Result<Self, MapParseError> {
        let (tag, rest) = raw.split_once(':').ok_or_else(|| {
            MapParseError::Malformed(format!("backend `{raw}` missing `tag:value` separator"))
        })?;
        match tag {
            "file" => Ok(BackendDescriptor::LocalFile(rest.to_string())),
            "shell" => Ok(BackendDescriptor::Shell(rest.to_string())),
            "sql" => Ok(BackendDescriptor::Sql(rest.to_string())),
            other => Err(MapParseError::Malformed(format!("unknown backend tag `{other}`"))),
        }
    }
}

/// A source-configuration row (spec §3, `MapEntry`).
///
/// The reversion daemon's countdown (`mi_time`) is not stored here: it lives
/// in [`crate::reversion::ReversionDaemon`], which owns the entries it
/// tracks under its own lock, per spec §4.C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub fs_path: String,
    pub backend: BackendDescriptor,
    /// POSIX permission bits folded from three decimal digits.
    pub mode: u32,
    /// `None` means "never auto-reverted" (a wildcard/absent `reval_sec`).
    pub reval_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapParseError {
    Malformed(String),
    MissingField { entry_index: usize, field: &'static str },
    DuplicatePath(String),
}

impl fmt::Display for MapParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapParseError::Malformed(msg) => write!(f, "malformed map entry: {msg}"),
            MapParseError::MissingField { entry_index, field } => {
                write!(f, "entry {entry_index} missing required field `{field}`")
            }
            MapParseError::DuplicatePath(path) => write!(f, "duplicate path `{path}`"),
        }
    }
}

impl std::error::Error for MapParseError {}

/// Three decimal digits (e.g. `"644"`) folded into POSIX `mode` bits.
fn parse_permission(raw: &str) -> Result<u32, MapParseError> {
    if raw.len() != 3 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MapParseError::Malformed(format!(
            "permission `{raw}` is not three decimal digits"
        )));
    }
    let mut mode = 0u32;
    for c in raw.chars() {
        let digit = c.to_digit(10).unwrap();
        if digit > 7 {
            return Err(MapParseError::Malformed(format!("permission digit `{digit}` out of octal range")));
        }
        mode = (mode << 3) | digit;
    }
    Ok(mode)
}

fn parse_reval_sec(raw: &str) -> Result<Option<u64>, MapParseError> {
    if raw == "*" || raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| MapParseError::Malformed(format!("reval_sec `{raw}` is not a non-negative integer")))
}

/// Parses the tagged text document into an absolute-path-keyed mapping.
/// Fails the whole parse on any malformed entry (atomic), per spec §4.A.
pub fn parse(document: &str) -> Result<BTreeMap<String, MapEntry>, MapParseError> {
    let mut entries: BTreeMap<String, MapEntry> = BTreeMap::new();

    for (entry_index, block) in document.split("---").enumerate() {
        let mut path: Option<String> = None;
        let mut backend: Option<BackendDescriptor> = None;
        let mut permission: Option<u32> = None;
        let mut reval_sec: Option<Option<u64>> = None;

        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                MapParseError::Malformed(format!("line `{line}` is not `key = value`"))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "path" => path = Some(value.to_string()),
                "backend" => backend = Some(BackendDescriptor::parse(value)?),
                "permission" => permission = Some(parse_permission(value)?),
                "reval_sec" => reval_sec = Some(parse_reval_sec(value)?),
                other => return Err(MapParseError::Malformed(format!("unknown field `{other}`"))),
            }
        }

        if path.is_none() && backend.is_none() && permission.is_none() && reval_sec.is_none() {
            // A blank block (trailing separator, leading/trailing blank
            // document) is not an entry at all.
            continue;
        }

        let path = path.ok_or(MapParseError::MissingField { entry_index, field: "path" })?;
        let backend = backend.ok_or(MapParseError::MissingField { entry_index, field: "backend" })?;
        let permission = permission.ok_or(MapParseError::MissingField { entry_index, field: "permission" })?;
        let reval_sec = reval_sec.unwrap_or(None);

        if entries.contains_key(&path) {
            return Err(MapParseError::DuplicatePath(path));
        }

        entries.insert(
            path.clone(),
            MapEntry { fs_path: path, backend, mode: permission, reval_sec },
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_local_file_entry() {
        let doc = "path = /foo/bar\nbackend = file:/data/bar\npermission = 644\nreval_sec = 3600\n";
        let map = parse(doc).unwrap();
        let entry = map.get("/foo/bar").unwrap();
        assert_eq!(entry.backend, BackendDescriptor::LocalFile("/data/bar".into()));
        assert_eq!(entry.mode, 0o644);
        assert_eq!(entry.reval_sec, Some(3600));
    }

    #[test]
    fn wildcard_reval_sec_means_never_reverted() {
        let doc = "path = /foo/bar\nbackend = file:/data/bar\npermission = 444\nreval_sec = *\n";
        let map = parse(doc).unwrap();
        assert_eq!(map["/foo/bar"].reval_sec, None);
    }

    #[test]
    fn multiple_entries_separated_by_dashes() {
        let doc = "path = /a\nbackend = file:/data/a\npermission = 644\nreval_sec = 60\n---\npath = /b\nbackend = shell:/bin/echo hi\npermission = 444\nreval_sec = *\n";
        let map = parse(doc).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["/b"].backend, BackendDescriptor::Shell("/bin/echo hi".into()));
    }

    #[test]
    fn sql_backend_is_recognized() {
        let doc = "path = /q\nbackend = sql:SELECT 1\npermission = 444\nreval_sec = 10\n";
        let map = parse(doc).unwrap();
        assert_eq!(map["/q"].backend, BackendDescriptor::Sql("SELECT 1".into()));
    }

    #[test]
    fn malformed_entry_fails_the_whole_parse() {
        let doc = "path = /a\nbackend = file:/data/a\npermission = 644\nreval_sec = 60\n---\npath = /b\nbackend = file:/data/b\npermission = bad\nreval_sec = *\n";
        assert!(parse(doc).is_err());
        // atomicity: even though /a was well-formed, nothing is returned.
    }

    #[test]
    fn missing_field_is_rejected() {
        let doc = "path = /a\nbackend = file:/data/a\nreval_sec = 60\n";
        assert!(matches!(parse(doc), Err(MapParseError::MissingField { field: "permission", .. })));
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let doc = "path = /a\nbackend = file:/x\npermission = 644\nreval_sec = 60\n---\npath = /a\nbackend = file:/y\npermission = 644\nreval_sec = 60\n";
        assert!(matches!(parse(doc), Err(MapParseError::DuplicatePath(_))));
    }

    #[test]
    fn unknown_backend_tag_is_malformed() {
        let doc = "path = /a\nbackend = ftp:/x\npermission = 644\nreval_sec = 60\n";
        assert!(matches!(parse(doc), Err(MapParseError::Malformed(_))));
    }
}
