//! Deadline queue and background uploader thread, per spec §4.F: deferred
//! mutations are coalesced by fingerprint (a second write to the same path
//! before its deadline fires extends the deadline rather than queuing a
//! second update) and flushed in a single batched POST once due, grounded
//! in `ms_client_queue_update`/`ms_client_put_update` in
//! `original_source/common/ms-client.cpp`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prost::Message;

use super::{fingerprint, now_ms, MsClient, MsError, Timing, UpdateOp};
use crate::proto;
use crate::types::InodeMeta;

/// One deferred mutation sitting in the pending set.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub op: UpdateOp,
    pub path: String,
    pub entry: InodeMeta,
    pub queued_at_ms: u64,
}

impl MsClient {
    /// Queues `entry` for upload no later than `deadline_ms`. If an update
    /// for the same path is already pending, its deadline is pushed out by
    /// `coalesce_delta_ms` instead of creating a second entry (spec §4.F
    /// "coalesce updates to the same fingerprint").
    pub fn queue_update(&self, path: &str, entry: InodeMeta, op: UpdateOp, deadline_ms: u64, coalesce_delta_ms: u64) {
        let fp = fingerprint(path);
        let mut pending = self.pending.lock();

        let effective_deadline = if let Some(old_deadline) = pending.fp_to_deadline.remove(&fp) {
            pending.deadlines.remove(&(old_deadline, fp));
            old_deadline + coalesce_delta_ms
        } else {
            deadline_ms
        };

        pending.updates.insert(fp, PendingUpdate { op, path: path.to_string(), entry, queued_at_ms: now_ms() });
        pending.deadlines.insert((effective_deadline, fp));
        pending.fp_to_deadline.insert(fp, effective_deadline);
        drop(pending);
        self.cv.notify_all();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().updates.len()
    }

    /// Spawns the background uploader thread. Idempotent only in the sense
    /// that calling it twice spawns two threads; callers should call it
    /// once at gateway startup.
    pub fn start_uploader(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.uploader_running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = thread::spawn(move || this.uploader_loop());
        *self.uploader_handle.lock() = Some(handle);
    }

    fn uploader_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let due = {
                let mut pending = self.pending.lock();
                loop {
                    if !self.running.load(Ordering::SeqCst) {
                        return_uploader_stopped(&self);
                        return;
                    }
                    let now = now_ms();
                    match pending.deadlines.iter().next() {
                        Some(&(deadline, _)) if deadline <= now => break,
                        Some(&(deadline, _)) => {
                            let wait = Duration::from_millis((deadline - now).min(60_000));
                            self.cv.wait_for(&mut pending, wait);
                        }
                        None => {
                            self.cv.wait_for(&mut pending, Duration::from_millis(1000));
                        }
                    }
                }

                let now = now_ms();
                let mut due_keys = Vec::new();
                while let Some(&(deadline, fp)) = pending.deadlines.iter().next() {
                    if deadline > now {
                        break;
                    }
                    due_keys.push((deadline, fp));
                    pending.deadlines.remove(&(deadline, fp));
                }

                let mut batch = Vec::new();
                for (deadline, fp) in due_keys {
                    if let Some(update) = pending.updates.remove(&fp) {
                        pending.fp_to_deadline.remove(&fp);
                        batch.push((deadline, fp, update));
                    }
                }
                batch
            };

            if due.is_empty() {
                continue;
            }

            if let Err(_err) = self.send_batch(&due) {
                let mut pending = self.pending.lock();
                for (deadline, fp, update) in due {
                    pending.updates.insert(fp, update);
                    pending.deadlines.insert((deadline, fp));
                    pending.fp_to_deadline.insert(fp, deadline);
                }
            }
        }
        self.uploader_running.store(false, Ordering::SeqCst);
    }

    fn send_batch(&self, batch: &[(u64, u64, PendingUpdate)]) -> Result<(), MsError> {
        let updates: Vec<proto::Update> = batch
            .iter()
            .map(|(_, _, update)| proto::Update {
                op: proto::UpdateOp::from(update.op) as i32,
                timestamp_ms: update.queued_at_ms,
                entry: Some(proto::InodeEntry::from(&update.entry)),
            })
            .collect();
        let list = proto::UpdateList { updates };
        let mut buf = Vec::new();
        list.encode(&mut buf).map_err(|e| MsError::InvalidArgument(e.to_string()))?;

        let volume = self.volume.read().volume_id;
        let url = format!("{}/FILE/{}/batch", self.config.ms_url, volume);

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
        *self.write_timing.lock() = Timing::from_headers(resp.headers());
        match resp.status().as_u16() {
            200 => Ok(()),
            202 => {
                let bytes = resp.bytes()?;
                let code: i64 = String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(-1);
                Err(MsError::Logical(code))
            }
            other => Err(MsError::Protocol(other)),
        }
    }

    /// Stops the uploader thread, draining no further updates: anything
    /// still pending when `shutdown` is called is dropped, matching the
    /// original's best-effort flush-on-unmount semantics rather than
    /// blocking process exit on outstanding MS traffic.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cv.notify_all();
        while self.uploader_running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(handle) = self.uploader_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn return_uploader_stopped(client: &MsClient) {
    client.uploader_running.store(false, Ordering::SeqCst);
}
