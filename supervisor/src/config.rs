//! Parses `watchdog.conf` into `{ag_list, ag_daemon_port, watchdog_addr,
//! watchdog_port}`, per spec §4.H. Follows the same default-on-missing-file
//! loader shape as `gateway::config::load_config`.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// One shell command line per configured gateway child.
    pub ag_list: Vec<String>,
    /// Port each child listens on when no `-P <port>` flag is given.
    pub ag_daemon_port: u16,
    pub watchdog_addr: String,
    pub watchdog_port: u16,
    /// Pulse interval in seconds, per spec §4.H ("every 10 seconds").
    #[serde(default = "default_pulse_interval_secs")]
    pub pulse_interval_secs: u64,
}

fn default_pulse_interval_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ag_list: Vec::new(),
            ag_daemon_port: 8080,
            watchdog_addr: "127.0.0.1".to_string(),
            watchdog_port: 9191,
            pulse_interval_secs: default_pulse_interval_secs(),
        }
    }
}

impl Config {
    pub fn watchdog_pulse_url(&self) -> String {
        format!("http://{}:{}/pulse", self.watchdog_addr, self.watchdog_port)
    }
}

pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "watchdog config not found, using defaults");
        return Config::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to read watchdog config, using defaults");
            return Config::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to parse watchdog config, using defaults");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/watchdog.conf"));
        assert_eq!(config.ag_daemon_port, 8080);
    }

    #[test]
    fn parses_ag_list_and_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.conf");
        std::fs::write(
            &path,
            r#"
            ag_list = ["ag-gateway --config a.toml -P 9001", "ag-gateway --config b.toml -P 9002"]
            ag_daemon_port = 8080
            watchdog_addr = "10.0.0.1"
            watchdog_port = 9191
            "#,
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(config.ag_list.len(), 2);
        assert_eq!(config.watchdog_pulse_url(), "http://10.0.0.1:9191/pulse");
        assert_eq!(config.pulse_interval_secs, 10);
    }
}
