//! Error taxonomy for the supervisor, per spec §7's "Fatal" category applied
//! to component H: failed config load or failed child spawn exits non-zero.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn child `{command}`: {source}")]
    Spawn { command: String, #[source] source: std::io::Error },

    #[error("pulse transport error: {0}")]
    Pulse(#[from] reqwest::Error),
}
