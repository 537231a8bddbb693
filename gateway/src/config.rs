//! Process-level configuration for the `ag-gateway` binary: bind address,
//! MS URL and credentials, blocksize, timeouts, and the map-document path.
//! Loading follows `client/src/config.rs`'s `load_config()` pattern
//! (default-on-missing-file, log-and-default on parse failure), reworked to
//! use `tracing` instead of `println!`/`eprintln!` and a caller-supplied
//! path instead of a hardcoded `config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::MutationAuthority;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationAuthorityConfig {
    PublisherAuthoritative,
    MsAuthoritative,
}

impl From<MutationAuthorityConfig> for MutationAuthority {
    fn from(c: MutationAuthorityConfig) -> Self {
        match c {
            MutationAuthorityConfig::PublisherAuthoritative => MutationAuthority::PublisherAuthoritative,
            MutationAuthorityConfig::MsAuthoritative => MutationAuthority::MsAuthoritative,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub ms_url: String,
    pub ms_username: String,
    pub ms_password: String,
    pub volume_name: String,
    pub volume_secret: String,
    pub gateway_id: u64,
    pub content_url: String,
    pub map_document_path: PathBuf,
    pub blocksize: u64,
    pub ms_connect_timeout_ms: u64,
    pub ms_transfer_timeout_ms: u64,
    /// Deadline given to a freshly queued MS mutation, in milliseconds.
    pub publish_deadline_ms: u64,
    /// `delta_ms` applied on coalesced supersession, spec §4.F.
    pub coalesce_delta_ms: u64,
    pub mutation_authority: MutationAuthorityConfig,
    /// How often the directory monitor re-walks its configured roots
    /// (external to the core per §5, default 10s).
    pub monitor_interval_secs: u64,
    /// Directory roots watched by the disk-polling driver (component D).
    /// Empty means no directory monitor thread is started.
    #[serde(default)]
    pub watch_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:8080".to_string(),
            ms_url: "http://127.0.0.1:9090".to_string(),
            ms_username: "gateway".to_string(),
            ms_password: "".to_string(),
            volume_name: "default".to_string(),
            volume_secret: "".to_string(),
            gateway_id: 1,
            content_url: "http://127.0.0.1:8080".to_string(),
            map_document_path: PathBuf::from("map.conf"),
            blocksize: 4096,
            ms_connect_timeout_ms: 5_000,
            ms_transfer_timeout_ms: 30_000,
            publish_deadline_ms: 60_000,
            coalesce_delta_ms: 500,
            mutation_authority: MutationAuthorityConfig::PublisherAuthoritative,
            monitor_interval_secs: 10,
            watch_roots: Vec::new(),
        }
    }
}

impl Config {
    pub fn ms_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ms_connect_timeout_ms)
    }

    pub fn ms_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.ms_transfer_timeout_ms)
    }
}

/// Loads `path`, falling back to [`Config::default`] if the file is
/// missing or fails to parse.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Config::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to read config file, using defaults");
            return Config::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to parse config file, using defaults");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/ag-gateway.toml"));
        assert_eq!(config.bind_addr, Config::default().bind_addr);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            bind_addr = "127.0.0.1:9000"
            ms_url = "http://ms.example"
            ms_username = "u"
            ms_password = "p"
            volume_name = "vol"
            volume_secret = "s"
            gateway_id = 42
            content_url = "http://gw.example"
            map_document_path = "map.conf"
            blocksize = 8192
            ms_connect_timeout_ms = 1000
            ms_transfer_timeout_ms = 2000
            publish_deadline_ms = 1000
            coalesce_delta_ms = 100
            mutation_authority = "publisher_authoritative"
            monitor_interval_secs = 5
            "#,
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(config.gateway_id, 42);
        assert_eq!(config.blocksize, 8192);
    }
}
