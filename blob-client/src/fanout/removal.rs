//! Parallel removal (C9): acquires the fragment listing for a chunk, then
//! deletes every (drive, key) pair with bounded concurrency.

use std::sync::Arc;

use blob_kinetic_proto::ExchangeRequest;
use blob_types::{ChunkFingerprint, Config, Status};
use futures::stream::{self, StreamExt};
use log::debug;
use tokio::runtime::Handle;

use super::listing::fetch_key_range_all;
use crate::kinetic_client::KineticClient;
use crate::transaction::Removal;
use crate::TxState;

pub struct ParallelRemoval {
    clients: Vec<Arc<KineticClient>>,
    start: Vec<u8>,
    end: Vec<u8>,
    parallelism: usize,
    handle: Handle,
    state: TxState,
    targets: Vec<(Arc<KineticClient>, Vec<u8>)>,
}

impl ParallelRemoval {
    pub fn new(clients: Vec<Arc<KineticClient>>, fingerprint: &ChunkFingerprint, config: &Config, handle: Handle) -> Self {
        Self {
            clients,
            start: fingerprint.listing_lower_bound().into_bytes(),
            end: fingerprint.listing_upper_bound().into_bytes(),
            parallelism: config.removal_parallelism.max(1),
            handle,
            state: TxState::default(),
            targets: Vec::new(),
        }
    }
}

impl Removal for ParallelRemoval {
    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let (targets, status) = fetch_key_range_all(&self.clients, &self.start, &self.end, 10_000, &self.handle);
        if !status.is_ok() {
            return status;
        }
        debug!("parallel removal prepare: {} fragments found", targets.len());
        self.targets = targets;
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let targets = std::mem::take(&mut self.targets);
        let parallelism = self.parallelism;
        let statuses = self.handle.block_on(async move {
            stream::iter(targets.into_iter().map(|(client, key)| async move { client.rpc(ExchangeRequest::Delete { key }).await.status }))
                .buffer_unordered(parallelism)
                .collect::<Vec<_>>()
                .await
        });
        let result = Status::worst(&statuses);
        debug!("parallel removal commit: {} deletes, result {}", statuses.len(), result);
        result
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        self.targets.clear();
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_set_commits_ok() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let fp = ChunkFingerprint::new("ns", "acct", "cnt", "/p", "c");
        let mut removal = ParallelRemoval::new(Vec::new(), &fp, &Config::default(), rt.handle().clone());
        assert!(removal.prepare().is_ok());
        assert!(removal.commit().is_ok());
    }
}
