//! The Kinetic coroutine client (C6): one instance per drive, multiplexing
//! many in-flight request/reply exchanges over a single TCP connection.
//!
//! A producer task owns the write half of the socket and the allocation of
//! sequence ids; a consumer task owns the read half and correlates replies
//! against a shared pending table. Both are spawned as `Abortable` futures
//! (mirroring `pbs_client::BackupWriter`'s own `futures::future::AbortHandle`
//! field) so the client can cancel them on close/drop without an explicit
//! shutdown protocol.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Error};
use blob_kinetic_proto::{build_request_frame, parse_reply_frame, Context, ExchangeReply, ExchangeRequest, FRAME_HEADER_LEN};
use blob_types::{Cause, Config, Status, Url};
use futures::future::{abortable, AbortHandle};
use log::{debug, error, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// Outcome of one completed (or failed/timed-out) exchange, as delivered to
/// the caller of [`KineticClient::rpc`].
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub status: Status,
    pub value: Vec<u8>,
    pub keys: Vec<Vec<u8>>,
}

impl ExchangeOutcome {
    fn err(status: Status) -> Self {
        Self {
            status,
            value: Vec::new(),
            keys: Vec::new(),
        }
    }

    fn from_reply(reply: ExchangeReply) -> Self {
        Self {
            status: reply.status,
            value: reply.value,
            keys: reply.keys,
        }
    }
}

struct PendingExchange {
    deadline: Instant,
    completion: oneshot::Sender<ExchangeOutcome>,
}

struct Submission {
    request: ExchangeRequest,
    deadline: Duration,
    reply_tx: oneshot::Sender<ExchangeOutcome>,
}

type PendingTable = Arc<Mutex<BTreeMap<u64, PendingExchange>>>;

/// One multiplexed connection to a single Kinetic drive.
///
/// Cheaply cloned references are not needed: callers share a client behind
/// `Arc<KineticClient>` (see [`ClientFactory`]); the producer/consumer tasks
/// outlive every individual `rpc` call.
pub struct KineticClient {
    url: Url,
    config: Config,
    handle: Handle,
    submit_tx: mpsc::Sender<Submission>,
    degraded: Arc<AtomicBool>,
    producer_abort: AbortHandle,
    consumer_abort: AbortHandle,
}

impl KineticClient {
    /// Connects to `url`, performs no explicit handshake RPC (the Kinetic
    /// protocol's implicit handshake is the connection itself), and spawns
    /// the producer/consumer task pair onto the runtime `connect` is called
    /// from.
    pub async fn connect(url: Url, identity: i64, shared_secret: Vec<u8>, config: Config) -> Result<Self, Error> {
        let stream = TcpStream::connect((url.host(), url.port()))
            .await
            .with_context(|| format!("connecting to kinetic drive {}", url))?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let connection_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let ctx = Context::new(connection_id, identity, shared_secret.clone());

        let pending: PendingTable = Arc::new(Mutex::new(BTreeMap::new()));
        let degraded = Arc::new(AtomicBool::new(false));
        let (submit_tx, submit_rx) = mpsc::channel(64);

        let producer = producer_loop(write_half, ctx, submit_rx, pending.clone(), config.max_frame_size, degraded.clone());
        let (producer, producer_abort) = abortable(producer);
        tokio::spawn(producer);

        let consumer = consumer_loop(read_half, pending, shared_secret, config.max_frame_size, degraded.clone());
        let (consumer, consumer_abort) = abortable(consumer);
        tokio::spawn(consumer);

        debug!("kinetic client connected: {}", url);

        Ok(Self {
            url,
            config,
            handle: Handle::current(),
            submit_tx,
            degraded,
            producer_abort,
            consumer_abort,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True once a network or protocol error has torn down this connection.
    /// A degraded client is never reused by [`ClientFactory::get`].
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Submits `request` and awaits its reply, using the client's configured
    /// default deadline. Returns immediately if the producer has already
    /// shut down (submission channel closed).
    pub async fn rpc(&self, request: ExchangeRequest) -> ExchangeOutcome {
        self.rpc_with_deadline(request, self.config.rpc_deadline).await
    }

    pub async fn rpc_with_deadline(&self, request: ExchangeRequest, deadline: Duration) -> ExchangeOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .submit_tx
            .send(Submission {
                request,
                deadline,
                reply_tx,
            })
            .await
            .is_err()
        {
            return ExchangeOutcome::err(Status::with_message(Cause::NetworkError, "kinetic client is closed"));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| ExchangeOutcome::err(Status::with_message(Cause::NetworkError, "exchange dropped before completion")))
    }

    /// Synchronous wrapper around [`KineticClient::rpc`], for the
    /// `Upload`/`Download`/`Removal`/`Listing` back-ends in
    /// [`crate::backends::kinetic`], which are not themselves `async`.
    pub fn rpc_blocking(&self, request: ExchangeRequest) -> ExchangeOutcome {
        self.handle.block_on(self.rpc(request))
    }

    /// Cancels the producer/consumer tasks and marks the client degraded.
    /// Any exchanges still in flight observe their oneshot sender dropped
    /// and resolve to a `NetworkError`.
    pub fn close(&self) {
        self.degraded.store(true, Ordering::SeqCst);
        self.producer_abort.abort();
        self.consumer_abort.abort();
    }
}

impl Drop for KineticClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn producer_loop(
    mut write_half: OwnedWriteHalf,
    mut ctx: Context,
    mut submit_rx: mpsc::Receiver<Submission>,
    pending: PendingTable,
    max_frame_size: u32,
    degraded: Arc<AtomicBool>,
) {
    while let Some(submission) = submit_rx.recv().await {
        let Submission {
            request,
            deadline,
            reply_tx,
        } = submission;

        let (sequence, frame_bytes) = match build_request_frame(&mut ctx, &request, deadline.as_millis() as i64, max_frame_size) {
            Ok(v) => v,
            Err(err) => {
                let _ = reply_tx.send(ExchangeOutcome::err(Status::with_message(Cause::InternalError, err.to_string())));
                continue;
            }
        };

        {
            let mut table = pending.lock().unwrap();
            table.insert(
                sequence,
                PendingExchange {
                    deadline: Instant::now() + deadline,
                    completion: reply_tx,
                },
            );
        }

        if let Err(err) = write_half.write_all(&frame_bytes).await {
            warn!("kinetic producer write error: {}", err);
            degraded.store(true, Ordering::SeqCst);
            fail_exchange(&pending, sequence, Cause::NetworkError, err.to_string());
            fail_all(&pending, Cause::NetworkError, "connection closed after write error").await;
            return;
        }
        trace!("kinetic producer sent sequence {}", sequence);
    }
}

async fn consumer_loop(
    mut read_half: OwnedReadHalf,
    pending: PendingTable,
    shared_secret: Vec<u8>,
    max_frame_size: u32,
    degraded: Arc<AtomicBool>,
) {
    let mut sweep = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            frame = read_frame(&mut read_half, max_frame_size) => {
                match frame {
                    Ok((message, value)) => match parse_reply_frame(&message, value, &shared_secret) {
                        Ok(reply) => {
                            let sequence = reply.sequence;
                            let completion = {
                                let mut table = pending.lock().unwrap();
                                table.remove(&sequence)
                            };
                            match completion {
                                Some(p) => {
                                    let _ = p.completion.send(ExchangeOutcome::from_reply(reply));
                                }
                                None => warn!("kinetic consumer: dropping reply for unknown sequence {}", sequence),
                            }
                        }
                        Err(err) => {
                            error!("kinetic protocol error, tearing down connection: {}", err);
                            degraded.store(true, Ordering::SeqCst);
                            fail_all(&pending, Cause::ProtocolError, err.to_string()).await;
                            return;
                        }
                    },
                    Err(err) => {
                        warn!("kinetic read error, tearing down connection: {}", err);
                        degraded.store(true, Ordering::SeqCst);
                        fail_all(&pending, Cause::NetworkError, err.to_string()).await;
                        return;
                    }
                }
            }
            _ = sweep.tick() => {
                evict_expired(&pending);
            }
        }
    }
}

async fn read_frame(read_half: &mut OwnedReadHalf, max_frame_size: u32) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_half.read_exact(&mut header).await?;
    let (msg_len, val_len) = blob_kinetic_proto::Frame::decode_header(&header, max_frame_size)?;

    let mut message = vec![0u8; msg_len as usize];
    read_half.read_exact(&mut message).await?;
    let mut value = vec![0u8; val_len as usize];
    read_half.read_exact(&mut value).await?;
    Ok((message, value))
}

fn fail_exchange(pending: &PendingTable, sequence: u64, cause: Cause, message: impl Into<String>) {
    let entry = {
        let mut table = pending.lock().unwrap();
        table.remove(&sequence)
    };
    if let Some(entry) = entry {
        let _ = entry.completion.send(ExchangeOutcome::err(Status::with_message(cause, message)));
    }
}

async fn fail_all(pending: &PendingTable, cause: Cause, message: impl Into<String>) {
    let message = message.into();
    let drained: Vec<PendingExchange> = {
        let mut table = pending.lock().unwrap();
        std::mem::take(&mut *table).into_values().collect()
    };
    for entry in drained {
        let _ = entry.completion.send(ExchangeOutcome::err(Status::with_message(cause, message.clone())));
    }
}

fn evict_expired(pending: &PendingTable) {
    let now = Instant::now();
    let expired: Vec<(u64, PendingExchange)> = {
        let mut table = pending.lock().unwrap();
        let expired_keys: Vec<u64> = table
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect();
        expired_keys.into_iter().filter_map(|k| table.remove(&k).map(|p| (k, p))).collect()
    };
    for (sequence, entry) in expired {
        warn!("kinetic exchange {} timed out", sequence);
        let _ = entry.completion.send(ExchangeOutcome::err(Status::new(Cause::NetworkError)));
    }
}

/// Owns one shared, multiplexed `KineticClient` per drive URL, reconnecting
/// lazily whenever the cached client is absent or degraded. Mirrors the
/// teacher's one-client-per-repository-URL convention.
#[derive(Clone)]
pub struct ClientFactory {
    handle: Handle,
    config: Config,
    clients: Arc<Mutex<HashMap<String, Arc<KineticClient>>>>,
}

impl ClientFactory {
    pub fn new(handle: Handle, config: Config) -> Self {
        Self {
            handle,
            config,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the cached client for `url` if present and not degraded,
    /// otherwise connects a fresh one and caches it.
    pub async fn get(&self, url: &Url, identity: i64, shared_secret: &[u8]) -> Result<Arc<KineticClient>, Error> {
        let key = url.host_port();
        {
            let clients = self.clients.lock().unwrap();
            if let Some(client) = clients.get(&key) {
                if !client.is_degraded() {
                    return Ok(client.clone());
                }
            }
        }

        let client = Arc::new(KineticClient::connect(url.clone(), identity, shared_secret.to_vec(), self.config.clone()).await?);
        let mut clients = self.clients.lock().unwrap();
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Synchronous convenience wrapper around [`ClientFactory::get`] for
    /// callers (like the synchronous `Upload`/`Download` trait impls) that
    /// are not themselves `async`.
    pub fn get_blocking(&self, url: &Url, identity: i64, shared_secret: &[u8]) -> Result<Arc<KineticClient>, Error> {
        self.handle.block_on(self.get(url, identity, shared_secret))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_types::Config;
    use std::net::TcpListener;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn rpc_against_unreachable_drive_times_out_with_network_error() {
        // Bind and immediately drop, so the port is refused on connect.
        let port = free_port();
        let url = Url::parse(&format!("127.0.0.1:{}", port)).unwrap();
        let result = KineticClient::connect(url, 1, b"secret".to_vec(), Config::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rpc_returns_network_error_once_client_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            // Accept once and hold the connection open without replying.
            let _ = listener.accept();
            std::thread::sleep(Duration::from_secs(5));
        });

        let url = Url::parse(&format!("127.0.0.1:{}", addr.port())).unwrap();
        let config = Config::default().with_rpc_deadline(Duration::from_millis(50));
        let client = KineticClient::connect(url, 1, b"secret".to_vec(), config).await.unwrap();
        client.close();
        let outcome = client.rpc(ExchangeRequest::GetLog).await;
        assert_eq!(outcome.status.cause(), Cause::NetworkError);
    }
}
