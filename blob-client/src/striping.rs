//! Striping upload (C8): splits a payload into fixed-size blocks and
//! distributes them round-robin across a set of Kinetic drives, writing the
//! xattr manifest last so its presence is the chunk's commit marker.
//!
//! Each block PUT is fired from `write` without being awaited (mirroring the
//! teacher's `pxar_backup_stream` fan-out, which stashes a `Vec<JoinHandle>`
//! and joins it once at the end); `commit` joins every outstanding PUT plus
//! the manifest PUT and reports the worst status across all of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use blob_kinetic_proto::ExchangeRequest;
use blob_types::{Cause, ChunkFingerprint, Config, Status};
use log::{debug, trace, warn};
use proxmox_human_byte::HumanByte;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::kinetic_client::{ExchangeOutcome, KineticClient};
use crate::transaction::Upload;
use crate::TxState;

pub struct StripingUpload {
    fingerprint: ChunkFingerprint,
    clients: Vec<Arc<KineticClient>>,
    config: Config,
    handle: Handle,
    state: TxState,
    buffer: Vec<u8>,
    next_drive: usize,
    next_seq: u64,
    pending: Vec<JoinHandle<ExchangeOutcome>>,
    xattrs: BTreeMap<String, String>,
    total_written: u64,
}

impl StripingUpload {
    pub fn new(fingerprint: ChunkFingerprint, clients: Vec<Arc<KineticClient>>, config: Config, handle: Handle) -> Self {
        Self {
            fingerprint,
            clients,
            config,
            handle,
            state: TxState::default(),
            buffer: Vec::new(),
            next_drive: 0,
            next_seq: 0,
            pending: Vec::new(),
            xattrs: BTreeMap::new(),
            total_written: 0,
        }
    }

    fn drive(&mut self) -> Arc<KineticClient> {
        let drive = self.clients[self.next_drive % self.clients.len()].clone();
        self.next_drive += 1;
        drive
    }

    fn flush_block(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.fingerprint.block_key(seq, bytes.len()).into_bytes();
        let drive = self.drive();
        trace!("striping upload flush block seq={} len={}", seq, bytes.len());
        let handle = self.handle.spawn(async move {
            drive
                .rpc(ExchangeRequest::Put {
                    key,
                    value: bytes,
                    db_version: Vec::new(),
                    new_version: Vec::new(),
                })
                .await
        });
        self.pending.push(handle);
    }

    fn flush_manifest(&mut self) {
        let manifest = serde_json::to_vec(&self.xattrs).unwrap_or_default();
        let key = self.fingerprint.manifest_key().into_bytes();
        let drive = self.drive();
        debug!("striping upload flush manifest ({} bytes)", manifest.len());
        let handle = self.handle.spawn(async move {
            drive
                .rpc(ExchangeRequest::Put {
                    key,
                    value: manifest,
                    db_version: Vec::new(),
                    new_version: Vec::new(),
                })
                .await
        });
        self.pending.push(handle);
    }

    fn join_pending(&mut self) -> Status {
        let pending = std::mem::take(&mut self.pending);
        let outcomes = self.handle.block_on(futures::future::join_all(pending));
        let mut statuses = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(o) => statuses.push(o.status),
                Err(join_err) => {
                    warn!("striping upload: a block PUT task panicked/was cancelled: {}", join_err);
                    statuses.push(Status::with_message(Cause::InternalError, join_err.to_string()));
                }
            }
        }
        Status::worst(&statuses)
    }
}

impl Upload for StripingUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.xattrs.insert(key.to_string(), String::from_utf8_lossy(value).into_owned());
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        if self.clients.is_empty() {
            return Status::with_message(Cause::InternalError, "striping upload requires at least one drive");
        }
        debug!("striping upload prepare: {}", self.fingerprint);

        let manifest_key = self.fingerprint.manifest_key().into_bytes();
        let checks: Vec<_> = self
            .clients
            .iter()
            .map(|client| {
                let client = client.clone();
                let key = manifest_key.clone();
                async move {
                    client
                        .rpc(ExchangeRequest::GetKeyRange {
                            start: key.clone(),
                            end: key,
                            start_inclusive: true,
                            end_inclusive: true,
                            max_returned: 1,
                        })
                        .await
                }
            })
            .collect();
        let outcomes = self.handle.block_on(futures::future::join_all(checks));

        if outcomes.iter().any(|o| !o.keys.is_empty()) {
            return Status::new(Cause::Already);
        }
        let worst = Status::worst(outcomes.iter().map(|o| &o.status));
        if !worst.is_ok() {
            return worst;
        }
        Status::ok()
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.total_written += bytes.len() as u64;
        self.buffer.extend_from_slice(bytes);
        while self.buffer.len() >= self.config.block_size {
            let block: Vec<u8> = self.buffer.drain(..self.config.block_size).collect();
            self.flush_block(block);
        }
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            self.flush_block(tail);
        }
        // The manifest's presence is the chunk's commit marker, so it must
        // not be PUT until every data block has been durably written --
        // joining the block PUTs before even starting the manifest PUT, not
        // racing the two, is what makes that true instead of just likely.
        let blocks_status = self.join_pending();
        if !blocks_status.is_ok() {
            debug!("striping upload commit {}: block write failed, manifest withheld: {}", self.fingerprint, blocks_status);
            return blocks_status;
        }

        self.flush_manifest();
        let manifest_status = self.join_pending();
        let status = Status::worst(&[blocks_status, manifest_status]);
        debug!(
            "striping upload commit {}: {} written across {} blocks, {}",
            self.fingerprint,
            HumanByte::from(self.total_written),
            self.next_seq,
            status
        );
        status
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        for handle in self.pending.drain(..) {
            handle.abort();
        }
        self.buffer.clear();
        Status::ok()
    }
}

impl Drop for StripingUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_types::ChunkFingerprint;

    #[test]
    fn block_keys_match_round_robin_layout() {
        // Mirrors the spec's worked example: 3 drives, block size 4, payload
        // "ABCDEFGHIJ" -> keys c-0-4, c-1-4, c-2-2 on drives 0,1,2.
        let fp = ChunkFingerprint::new("ns", "acct", "cnt", "/p", "c");
        assert_eq!(fp.block_key(0, 4), "c-0-4");
        assert_eq!(fp.block_key(1, 4), "c-1-4");
        assert_eq!(fp.block_key(2, 2), "c-2-2");
        assert_eq!(fp.manifest_key(), "c-#");
    }
}
