//! HTTP+JSON pulse transport to the central watchdog daemon, replacing the
//! Thrift RPC the original uses (out of scope per spec §1; see SPEC_FULL.md
//! §9 for the policy decision). Carries the same logical payload spec §4.H
//! specifies: `(id, live_set, dead_set)` every `pulse_interval_secs`.

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

#[derive(Debug, Serialize)]
pub struct PulseRequest {
    pub supervisor_id: String,
    pub live: Vec<u64>,
    pub dead: Vec<u64>,
}

/// Child ids the central daemon wants restarted, per spec §4.H ("the
/// central daemon can reply with a restart directive per child id").
#[derive(Debug, Deserialize, Default)]
pub struct PulseResponse {
    #[serde(default)]
    pub restart: Vec<u64>,
}

pub struct PulseClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl PulseClient {
    pub fn new(url: String) -> Self {
        PulseClient { client: reqwest::blocking::Client::new(), url }
    }

    pub fn send(&self, request: &PulseRequest) -> Result<PulseResponse, SupervisorError> {
        let resp = self.client.post(&self.url).json(request).send()?;
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "pulse rejected by watchdog daemon");
            return Ok(PulseResponse::default());
        }
        Ok(resp.json().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_request_serializes_live_and_dead_sets() {
        let request = PulseRequest { supervisor_id: "sup-1".to_string(), live: vec![1, 2], dead: vec![3] };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"live\":[1,2]"));
        assert!(json.contains("\"dead\":[3]"));
    }

    #[test]
    fn pulse_response_defaults_to_no_restarts() {
        let response: PulseResponse = serde_json::from_str("{}").unwrap();
        assert!(response.restart.is_empty());
    }
}
