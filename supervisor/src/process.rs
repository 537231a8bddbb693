//! Forks and tracks configured gateway children, per spec §4.H: "tokenizes
//! the command (extracting `-P <port>`), forks-and-exec's it, records the
//! `{host:port}` descriptor."

use std::process::{Child, Command};

use crate::error::SupervisorError;

/// A live gateway child tracked by the supervisor.
pub struct ManagedChild {
    pub id: u64,
    pub command_line: String,
    pub host: String,
    pub port: u16,
    pub child: Child,
}

impl ManagedChild {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Splits on whitespace, honoring no quoting beyond that — the original
/// shell drivers this spec replaces do not either.
fn tokenize(command_line: &str) -> Vec<String> {
    command_line.split_whitespace().map(str::to_string).collect()
}

/// Extracts the `-P <port>` flag pair from a tokenized command, if present.
fn extract_port(tokens: &[String], default_port: u16) -> u16 {
    tokens
        .iter()
        .position(|t| t == "-P")
        .and_then(|i| tokens.get(i + 1))
        .and_then(|p| p.parse().ok())
        .unwrap_or(default_port)
}

/// Forks `command_line` and returns the tracked child, per spec §4.H.
pub fn spawn(id: u64, command_line: &str, default_port: u16) -> Result<ManagedChild, SupervisorError> {
    let tokens = tokenize(command_line);
    let (program, args) = tokens.split_first().ok_or_else(|| SupervisorError::Config(format!("empty ag_list entry at index {id}")))?;
    let port = extract_port(&tokens, default_port);

    let child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| SupervisorError::Spawn { command: command_line.to_string(), source })?;

    Ok(ManagedChild { id, command_line: command_line.to_string(), host: "127.0.0.1".to_string(), port, child })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_configured_port_flag() {
        let tokens = tokenize("ag-gateway --config a.toml -P 9001");
        assert_eq!(extract_port(&tokens, 8080), 9001);
    }

    #[test]
    fn falls_back_to_default_port_when_absent() {
        let tokens = tokenize("ag-gateway --config a.toml");
        assert_eq!(extract_port(&tokens, 8080), 8080);
    }

    #[test]
    fn spawning_an_empty_command_is_rejected() {
        let result = spawn(0, "   ", 8080);
        assert!(result.is_err());
    }

    #[test]
    fn spawns_a_real_process_and_tracks_its_port() {
        let mut managed = spawn(1, "sleep 30 -P 9123", 8080).unwrap();
        assert_eq!(managed.port, 9123);
        assert!(managed.pid() > 0);
        let _ = managed.child.kill();
        let _ = managed.child.wait();
    }
}
