//! Erasure-coded fan-out (C11): encodes a payload into `k` data fragments
//! plus `m` parity fragments, any `k` of which suffice to reconstruct the
//! original. `liberasurecode`, the external backend the original system
//! links against, has no equivalent Rust crate in the pack, so this module
//! carries its own pure-Rust systematic Reed-Solomon code: a Vandermonde
//! generator matrix (§4.9, §9) built once per `(k, m)` and inverted against
//! whichever `k` fragment indices are available on read.
//!
//! Upload buffers the whole payload (the caller's working buffer, per
//! spec), then on `commit` splits it into `k` equal-length shards
//! (zero-padded to a whole multiple of `k`), computes the `m` parity
//! shards, and fans all `k+m` fragments out to the matching back-end
//! targets in parallel -- the same `std::thread::scope` broadcast idiom
//! [`crate::fanout::replicated`] uses, since there is no async I/O to
//! multiplex above the synchronous `Upload`/`Download` trait objects.

pub mod codec;
pub mod gf256;
pub mod matrix;

use anyhow::{anyhow, Error};
use blob_types::{Cause, Slice, Status};
use log::{debug, warn};

use crate::transaction::{Download, Upload};
use crate::TxState;
use matrix::Matrix;

/// Builds the `(k+m) x k` systematic generator matrix: `G = V * V_top^-1`
/// where `V` is a `(k+m) x k` Vandermonde matrix and `V_top` is its first
/// `k` rows. Because `V_top * V_top^-1 = I`, `G`'s own first `k` rows are
/// the identity -- so fragments `0..k` are exactly the data shards, and
/// fragments `k..k+m` are the parity shards, each a GF(2^8)-linear
/// combination of all `k` data shards.
fn systematic_generator(k: usize, m: usize) -> Matrix {
    let vandermonde = Matrix::vandermonde(k + m, k);
    let top_rows: Vec<usize> = (0..k).collect();
    let top = vandermonde.select_rows(&top_rows);
    let top_inv = top.invert().expect("Vandermonde top submatrix is invertible by construction");
    vandermonde.mul(&top_inv)
}

fn encode_parity(generator: &Matrix, data_shards: &[Vec<u8>], k: usize, m: usize, shard_len: usize) -> Vec<Vec<u8>> {
    let mut parity = vec![vec![0u8; shard_len]; m];
    for (j, parity_shard) in parity.iter_mut().enumerate() {
        for p in 0..shard_len {
            let mut acc = 0u8;
            for (i, data_shard) in data_shards.iter().enumerate().take(k) {
                acc = gf256::add(acc, gf256::mul(generator.get(k + j, i), data_shard[p]));
            }
            parity_shard[p] = acc;
        }
    }
    parity
}

/// Reconstructs the `k` original data shards from any `k` of the `k+m`
/// fragment values named by `chosen` (indices into `fragments`).
fn decode_data(generator: &Matrix, fragments: &[(usize, Vec<u8>)], chosen: &[usize], k: usize, shard_len: usize) -> Result<Vec<u8>, Error> {
    let row_indices: Vec<usize> = chosen.iter().map(|&c| fragments[c].0).collect();
    let decode_matrix = generator.select_rows(&row_indices);
    let inverse = decode_matrix
        .invert()
        .ok_or_else(|| anyhow!("erasure decode matrix is singular for the chosen fragment set"))?;

    let mut out = vec![0u8; k * shard_len];
    for i in 0..k {
        for p in 0..shard_len {
            let mut acc = 0u8;
            for (j, &c) in chosen.iter().enumerate() {
                acc = gf256::add(acc, gf256::mul(inverse.get(i, j), fragments[c].1[p]));
            }
            out[i * shard_len + p] = acc;
        }
    }
    Ok(out)
}

/// `Upload` implementation encoding the whole payload into `k+m` fragments
/// on `commit` and fanning them out to `k+m` back-end targets, one fragment
/// per target in index order.
pub struct ErasureUpload {
    targets: Vec<Box<dyn Upload + Send>>,
    k: usize,
    m: usize,
    state: TxState,
    buf: Vec<u8>,
    prepared_ok: Vec<bool>,
}

impl ErasureUpload {
    pub fn new(targets: Vec<Box<dyn Upload + Send>>, k: usize, m: usize) -> Self {
        Self {
            targets,
            k,
            m,
            state: TxState::default(),
            buf: Vec::new(),
            prepared_ok: Vec::new(),
        }
    }
}

impl Upload for ErasureUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        let statuses: Vec<Status> = self.targets.iter_mut().map(|t| t.set_xattr(key, value)).collect();
        Status::worst(&statuses)
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        if self.targets.len() != self.k + self.m {
            return Status::with_message(
                Cause::InternalError,
                format!("erasure upload requires exactly k+m={} targets, got {}", self.k + self.m, self.targets.len()),
            );
        }
        debug!("erasure upload prepare: k={} m={}", self.k, self.m);

        let targets = &mut self.targets;
        let results: Vec<Status> = std::thread::scope(|scope| {
            let handles: Vec<_> = targets.iter_mut().map(|t| scope.spawn(move || t.prepare())).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Status::with_message(Cause::InternalError, "target thread panicked")))
                .collect()
        });

        self.prepared_ok = results.iter().map(Status::is_ok).collect();
        let ok_count = self.prepared_ok.iter().filter(|&&ok| ok).count();
        if ok_count < self.k {
            warn!("erasure upload prepare: only {}/{} targets OK, need {}", ok_count, self.k + self.m, self.k);
            return Status::worst(&results);
        }
        Status::ok()
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.buf.extend_from_slice(bytes);
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }

        let shard_len = self.buf.len().div_ceil(self.k).max(1);
        let mut data_shards = Vec::with_capacity(self.k);
        for i in 0..self.k {
            let start = (i * shard_len).min(self.buf.len());
            let end = ((i + 1) * shard_len).min(self.buf.len());
            let mut shard = vec![0u8; shard_len];
            shard[..end - start].copy_from_slice(&self.buf[start..end]);
            data_shards.push(shard);
        }

        let generator = systematic_generator(self.k, self.m);
        let parity_shards = encode_parity(&generator, &data_shards, self.k, self.m, shard_len);

        let k = self.k;
        let prepared_ok = &self.prepared_ok;
        let targets = &mut self.targets;
        let results: Vec<(usize, Status)> = std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| prepared_ok[*i])
                .map(|(i, target)| {
                    let payload: &[u8] = if i < k { &data_shards[i] } else { &parity_shards[i - k] };
                    let framed = codec::frame(i as u32, payload);
                    scope.spawn(move || {
                        let write_status = target.write(&framed);
                        if !write_status.is_ok() {
                            return (i, write_status);
                        }
                        (i, target.commit())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| (usize::MAX, Status::with_message(Cause::InternalError, "target thread panicked"))))
                .collect()
        });

        let mut statuses = vec![Status::new(Cause::InternalError); self.k + self.m];
        for (i, status) in results {
            if i < statuses.len() {
                statuses[i] = status;
            }
        }

        let ok_count = statuses.iter().filter(|s| s.is_ok()).count();
        let result = if ok_count >= self.k { Status::ok() } else { Status::worst(&statuses) };
        debug!("erasure upload commit: {}/{} fragments OK, result {}", ok_count, self.k + self.m, result);
        result
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let prepared_ok = &self.prepared_ok;
        let targets = &mut self.targets;
        std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| prepared_ok.get(*i).copied().unwrap_or(false))
                .map(|(_, target)| scope.spawn(move || target.abort()))
                .collect();
            for h in handles {
                let _ = h.join();
            }
        });
        self.buf.clear();
        Status::ok()
    }
}

impl Drop for ErasureUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

/// `Download` implementation reconstructing the payload from whichever of
/// the `k+m` fragment targets are readable; reconstruction happens entirely
/// inside `prepare` (mirroring [`crate::backends::local::LocalDownload`]'s
/// own buffer-then-serve shape), so `read` only slices the already-decoded
/// buffer.
pub struct ErasureDownload {
    targets: Vec<Box<dyn Download + Send>>,
    k: usize,
    m: usize,
    state: TxState,
    range: Option<(u64, u64)>,
    decoded: Option<Vec<u8>>,
    pos: usize,
    eof: bool,
}

impl ErasureDownload {
    pub fn new(targets: Vec<Box<dyn Download + Send>>, k: usize, m: usize) -> Self {
        Self {
            targets,
            k,
            m,
            state: TxState::default(),
            range: None,
            decoded: None,
            pos: 0,
            eof: false,
        }
    }
}

impl Download for ErasureDownload {
    fn set_range(&mut self, offset: u64, size: u64) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.range = Some((offset, size));
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        if self.targets.len() != self.k + self.m {
            return Status::with_message(
                Cause::InternalError,
                format!("erasure download requires exactly k+m={} targets, got {}", self.k + self.m, self.targets.len()),
            );
        }
        debug!("erasure download prepare: k={} m={}", self.k, self.m);

        let targets = &mut self.targets;
        let fetched: Vec<(usize, Status, Option<Vec<u8>>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter_mut()
                .enumerate()
                .map(|(i, target)| {
                    scope.spawn(move || {
                        let prepare_status = target.prepare();
                        if !prepare_status.is_ok() {
                            return (i, prepare_status, None);
                        }
                        let mut buf = Vec::new();
                        loop {
                            let mut slice = Slice::new();
                            let read_status = target.read(&mut slice);
                            if !read_status.is_ok() {
                                return (i, read_status, None);
                            }
                            buf.extend_from_slice(slice.data());
                            if target.is_eof() {
                                break;
                            }
                        }
                        (i, Status::ok(), Some(buf))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| (usize::MAX, Status::with_message(Cause::InternalError, "target thread panicked"), None)))
                .collect()
        });

        let mut fragments: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut missing = 0usize;
        for (i, status, raw) in fetched {
            if i >= self.k + self.m {
                missing += 1;
                continue;
            }
            match raw {
                Some(bytes) => match codec::unframe(&bytes) {
                    Ok(fragment) => fragments.push((i, fragment.payload)),
                    Err(err) => {
                        warn!("erasure fragment {} failed framing check: {}", i, err);
                        missing += 1;
                    }
                },
                None => {
                    warn!("erasure fragment {} unreadable: {}", i, status);
                    missing += 1;
                }
            }
        }

        if fragments.len() < self.k {
            return Status::with_message(
                Cause::InternalError,
                format!("only {} of {} fragments available ({} missing), need {}", fragments.len(), self.k + self.m, missing, self.k),
            );
        }

        let shard_len = fragments[0].1.len();
        let chosen: Vec<usize> = (0..self.k).collect();
        let generator = systematic_generator(self.k, self.m);
        let decoded = match decode_data(&generator, &fragments, &chosen, self.k, shard_len) {
            Ok(bytes) => bytes,
            Err(err) => return Status::with_message(Cause::InternalError, err.to_string()),
        };

        let (offset, size) = self.range.unwrap_or((0, 0));
        let start = (offset as usize).min(decoded.len());
        let end = if size == 0 { decoded.len() } else { (start + size as usize).min(decoded.len()) };

        self.decoded = Some(decoded[start..end].to_vec());
        self.pos = 0;
        Status::ok()
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn read(&mut self, slice: &mut Slice) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        let decoded = self.decoded.as_ref().expect("decoded set in prepare");
        if self.pos >= decoded.len() {
            self.eof = true;
            return Status::ok();
        }
        slice.append(&decoded[self.pos..]);
        self.pos = decoded.len();
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryDownload, MemoryRemoval, MemoryStore, MemoryUpload};
    use crate::transaction::Removal;

    fn targets_for(store: &MemoryStore, k: usize, m: usize, prefix: &str) -> (Vec<Box<dyn Upload + Send>>, Vec<Box<dyn Download + Send>>) {
        let uploads: Vec<Box<dyn Upload + Send>> = (0..k + m)
            .map(|i| Box::new(MemoryUpload::new(store.clone(), format!("{}-{}", prefix, i))) as Box<dyn Upload + Send>)
            .collect();
        let downloads: Vec<Box<dyn Download + Send>> = (0..k + m)
            .map(|i| Box::new(MemoryDownload::new(store.clone(), format!("{}-{}", prefix, i))) as Box<dyn Download + Send>)
            .collect();
        (uploads, downloads)
    }

    #[test]
    fn systematic_generator_first_k_rows_are_identity() {
        let generator = systematic_generator(4, 2);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(generator.get(r, c), if r == c { 1 } else { 0 });
            }
        }
    }

    #[test]
    fn round_trip_with_no_missing_fragments() {
        let store = MemoryStore::new();
        let (uploads, downloads) = targets_for(&store, 4, 2, "c1");

        // 44 bytes, an exact multiple of k=4: no zero padding is introduced,
        // so the caller's `set_range` window alone (with no separate
        // original-length store in `ErasureDownload`) is enough to recover
        // the exact payload.
        let payload = b"the quick brown fox jumps over the lazy dog!";
        assert_eq!(payload.len() % 4, 0);

        let mut upload = ErasureUpload::new(uploads, 4, 2);
        assert!(upload.prepare().is_ok());
        assert!(upload.write(payload).is_ok());
        assert!(upload.commit().is_ok());

        let mut download = ErasureDownload::new(downloads, 4, 2);
        assert!(download.set_range(0, payload.len() as u64).is_ok());
        assert!(download.prepare().is_ok());
        let mut slice = Slice::new();
        assert!(download.read(&mut slice).is_ok());
        assert_eq!(slice.data(), payload.as_slice());
    }

    #[test]
    fn decodes_with_m_fragments_missing() {
        let store = MemoryStore::new();
        let (uploads, mut downloads) = targets_for(&store, 4, 2, "c2");

        let payload = b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec();
        let mut upload = ErasureUpload::new(uploads, 4, 2);
        assert!(upload.prepare().is_ok());
        assert!(upload.write(&payload).is_ok());
        assert!(upload.commit().is_ok());

        // Delete fragment 5 (one of the two parity fragments) directly from
        // the store, the way the spec's scenario 5 deletes a fragment out
        // from under a pending download.
        let mut removal = MemoryRemoval::new(store.clone(), "c2-5");
        assert!(removal.prepare().is_ok());
        assert!(removal.commit().is_ok());
        downloads.remove(5);
        downloads.push(Box::new(MemoryDownload::new(store.clone(), "c2-5")) as Box<dyn Download + Send>);

        let mut download = ErasureDownload::new(downloads, 4, 2);
        assert!(download.set_range(0, payload.len() as u64).is_ok());
        assert!(download.prepare().is_ok());
        let mut slice = Slice::new();
        assert!(download.read(&mut slice).is_ok());
        assert_eq!(slice.data(), payload.as_slice());
    }

    #[test]
    fn fewer_than_k_fragments_is_internal_error() {
        let store = MemoryStore::new();
        let (uploads, downloads) = targets_for(&store, 4, 2, "c3");

        let mut upload = ErasureUpload::new(uploads, 4, 2);
        assert!(upload.prepare().is_ok());
        assert!(upload.write(b"payload").is_ok());
        assert!(upload.commit().is_ok());

        // Drop 3 of the 6 targets (more than m=2 can tolerate) by pointing
        // them at keys that were never written.
        let mut broken: Vec<Box<dyn Download + Send>> = Vec::new();
        for (i, d) in downloads.into_iter().enumerate() {
            if i < 3 {
                broken.push(Box::new(MemoryDownload::new(store.clone(), "does-not-exist")) as Box<dyn Download + Send>);
            } else {
                broken.push(d);
            }
        }

        let mut download = ErasureDownload::new(broken, 4, 2);
        assert_eq!(download.prepare().cause(), Cause::InternalError);
    }
}
