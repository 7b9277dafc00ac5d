//! Parallel listing (C9): fan a GETKEYRANGE out to every drive holding
//! fragments of a chunk, wait for all of them, and concatenate the results
//! tagged by the drive they came from.

use std::collections::VecDeque;
use std::sync::Arc;

use blob_kinetic_proto::ExchangeRequest;
use blob_types::Status;
use tokio::runtime::Handle;

use crate::kinetic_client::KineticClient;
use crate::transaction::Listing;
use crate::TxState;

/// Default page size used when a caller does not override it via
/// [`ParallelListing::with_max_returned`]. Generous enough that a single
/// round trip covers the fragments of one chunk in the common case; C9 does
/// not paginate beyond one round per drive (see §4.7).
const DEFAULT_MAX_RETURNED: i32 = 10_000;

/// Issues one GETKEYRANGE per drive concurrently, joins all of them, and
/// concatenates the results. Not internally paginated: a drive whose range
/// holds more than `max_returned` keys only contributes its first page.
pub(crate) fn fetch_key_range_all(
    clients: &[Arc<KineticClient>],
    start: &[u8],
    end: &[u8],
    max_returned: i32,
    handle: &Handle,
) -> (Vec<(Arc<KineticClient>, Vec<u8>)>, Status) {
    let futures: Vec<_> = clients
        .iter()
        .map(|client| {
            let client = client.clone();
            let start = start.to_vec();
            let end = end.to_vec();
            async move {
                let outcome = client
                    .rpc(ExchangeRequest::GetKeyRange {
                        start,
                        end,
                        start_inclusive: true,
                        end_inclusive: false,
                        max_returned,
                    })
                    .await;
                (client, outcome)
            }
        })
        .collect();

    let results = handle.block_on(futures::future::join_all(futures));
    let mut entries = Vec::new();
    let mut statuses = Vec::with_capacity(results.len());
    for (client, outcome) in results {
        statuses.push(outcome.status.clone());
        for key in outcome.keys {
            entries.push((client.clone(), key));
        }
    }
    (entries, Status::worst(&statuses))
}

pub struct ParallelListing {
    clients: Vec<Arc<KineticClient>>,
    start: Vec<u8>,
    end: Vec<u8>,
    max_returned: i32,
    handle: Handle,
    state: TxState,
    entries: VecDeque<(Arc<KineticClient>, Vec<u8>)>,
}

impl ParallelListing {
    pub fn new(clients: Vec<Arc<KineticClient>>, start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, handle: Handle) -> Self {
        Self {
            clients,
            start: start.into(),
            end: end.into(),
            max_returned: DEFAULT_MAX_RETURNED,
            handle,
            state: TxState::default(),
            entries: VecDeque::new(),
        }
    }

    pub fn with_max_returned(mut self, max_returned: i32) -> Self {
        self.max_returned = max_returned;
        self
    }
}

impl Listing for ParallelListing {
    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let (entries, status) = fetch_key_range_all(&self.clients, &self.start, &self.end, self.max_returned, &self.handle);
        self.entries = entries.into();
        status
    }

    fn next(&mut self, service_id: &mut String, key: &mut String) -> bool {
        if self.state.require_prepared().is_err() {
            return false;
        }
        match self.entries.pop_front() {
            Some((client, raw_key)) => {
                service_id.clear();
                service_id.push_str(&client.url().host_port());
                key.clear();
                key.push_str(&String::from_utf8_lossy(&raw_key));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_listing_starts_unprepared() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listing = ParallelListing::new(Vec::new(), b"a".to_vec(), b"b".to_vec(), rt.handle().clone());
        assert_eq!(listing.clients.len(), 0);
    }
}
