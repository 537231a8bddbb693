//! Synchronous per-inode RPCs: `create`, `mkdir`, `delete`, `update`, per
//! spec §4.F. Each posts a one-update [`proto::UpdateList`] as the
//! `ms-metadata-updates` multipart field and interprets the response code
//! per spec §6: `200` carries the resulting entry (or, for `create`, just
//! the assigned file id as decimal text), `202` carries a decimal MS error
//! code, anything else is a protocol error.

use prost::Message;

use super::{now_ms, MsClient, MsError};
use crate::proto;
use crate::types::InodeMeta;

/// Mirrors [`proto::UpdateOp`] without pulling generated-code naming into
/// the rest of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Create,
    Update,
    Delete,
}

impl From<UpdateOp> for proto::UpdateOp {
    fn from(op: UpdateOp) -> Self {
        match op {
            UpdateOp::Create => proto::UpdateOp::Create,
            UpdateOp::Update => proto::UpdateOp::Update,
            UpdateOp::Delete => proto::UpdateOp::Delete,
        }
    }
}

impl MsClient {
    pub fn create(&self, path: &str, entry: &InodeMeta) -> Result<InodeMeta, MsError> {
        self.send_single_update(UpdateOp::Create, path, entry)
    }

    pub fn mkdir(&self, path: &str, entry: &InodeMeta) -> Result<InodeMeta, MsError> {
        self.send_single_update(UpdateOp::Create, path, entry)
    }

    pub fn delete(&self, path: &str, entry: &InodeMeta) -> Result<(), MsError> {
        self.send_single_update(UpdateOp::Delete, path, entry).map(|_| ())
    }

    pub fn update(&self, path: &str, entry: &InodeMeta) -> Result<InodeMeta, MsError> {
        self.send_single_update(UpdateOp::Update, path, entry)
    }

    fn send_single_update(&self, op: UpdateOp, path: &str, entry: &InodeMeta) -> Result<InodeMeta, MsError> {
        let update = proto::Update {
            op: proto::UpdateOp::from(op) as i32,
            timestamp_ms: now_ms(),
            entry: Some(proto::InodeEntry::from(entry)),
        };
        let list = proto::UpdateList { updates: vec![update] };
        let mut buf = Vec::new();
        list.encode(&mut buf).map_err(|e| MsError::InvalidArgument(e.to_string()))?;

        let volume = self.volume.read().volume_id;
        let url = format!("{}/FILE/{}{}", self.config.ms_url, volume, path);

        self.acquire_slot(&self.uploading);
        let form = reqwest::blocking::multipart::Form::new()
            .part("ms-metadata-updates", reqwest::blocking::multipart::Part::bytes(buf));
        let result = self
            .write_client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .multipart(form)
            .send();
        Self::release_slot(&self.uploading);

        let resp = result?;
        let status = resp.status().as_u16();
        *self.write_timing.lock() = super::Timing::from_headers(resp.headers());

        match status {
            200 => {
                let bytes = resp.bytes()?;
                if bytes.is_empty() {
                    return Ok(entry.clone());
                }
                if let Ok(updated) = proto::InodeEntry::decode(bytes.clone()) {
                    return Ok(InodeMeta::from(updated));
                }
                let text = String::from_utf8_lossy(&bytes);
                let mut out = entry.clone();
                if let Ok(file_id) = text.trim().parse::<u64>() {
                    out.file_id = file_id;
                }
                Ok(out)
            }
            202 => {
                let bytes = resp.bytes()?;
                let code: i64 = String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(-1);
                Err(MsError::Logical(code))
            }
            other => Err(MsError::Protocol(other)),
        }
    }
}
