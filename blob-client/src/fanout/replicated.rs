//! Replicated fan-out (C10): broadcasts each phase to K target back-ends and
//! succeeds once M of them agree. The underlying `Upload` trait is
//! synchronous, so the broadcast itself uses plain OS threads
//! (`std::thread::scope`) rather than tokio -- there is no I/O here to
//! multiplex, only K independent blocking calls to join.

use blob_types::{Cause, Status};
use log::{info, warn};

use crate::transaction::Upload;
use crate::TxState;

/// Upload replicated across `targets.len()` back-ends, each phase succeeding
/// once at least `quorum` targets agree.
pub struct ReplicatedUpload {
    targets: Vec<Box<dyn Upload + Send>>,
    quorum: usize,
    state: TxState,
}

impl ReplicatedUpload {
    pub fn new(targets: Vec<Box<dyn Upload + Send>>, quorum: usize) -> Self {
        Self {
            targets,
            quorum,
            state: TxState::default(),
        }
    }

    fn broadcast<F>(&mut self, phase: &str, op: F) -> Status
    where
        F: Fn(&mut (dyn Upload + Send)) -> Status + Sync,
    {
        let op = &op;
        let results: Vec<Status> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .targets
                .iter_mut()
                .map(|target| scope.spawn(move || op(target.as_mut())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Status::with_message(Cause::InternalError, "replica thread panicked"))).collect()
        });

        let total = results.len();
        let ok_count = results.iter().filter(|s| s.is_ok()).count();
        if ok_count < total {
            info!("replicated upload {}: {}/{} targets OK", phase, ok_count, total);
        }
        if ok_count >= self.quorum {
            Status::ok()
        } else {
            Status::worst(&results)
        }
    }

    fn broadcast_best_effort<F>(&mut self, phase: &str, op: F)
    where
        F: Fn(&mut (dyn Upload + Send)) -> Status + Sync,
    {
        let op = &op;
        let results: Vec<Status> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .targets
                .iter_mut()
                .map(|target| scope.spawn(move || op(target.as_mut())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Status::with_message(Cause::InternalError, "replica thread panicked"))).collect()
        });
        for (index, status) in results.iter().enumerate() {
            if !status.is_ok() {
                warn!("replicated upload {}: target {} failed: {}", phase, index, status);
            }
        }
    }
}

impl Upload for ReplicatedUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.broadcast("set_xattr", |u| u.set_xattr(key, value))
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        self.broadcast("prepare", |u| u.prepare())
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.broadcast("write", |u| u.write(bytes))
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        self.broadcast("commit", |u| u.commit())
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        self.broadcast_best_effort("abort", |u| u.abort());
        Status::ok()
    }
}

impl Drop for ReplicatedUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyUpload {
        fail_prepare: bool,
        commits: Arc<AtomicUsize>,
    }

    impl Upload for FlakyUpload {
        fn set_xattr(&mut self, _key: &str, _value: &[u8]) -> Status {
            Status::ok()
        }
        fn prepare(&mut self) -> Status {
            if self.fail_prepare {
                Status::new(Cause::NetworkError)
            } else {
                Status::ok()
            }
        }
        fn write(&mut self, _bytes: &[u8]) -> Status {
            Status::ok()
        }
        fn commit(&mut self) -> Status {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Status::ok()
        }
        fn abort(&mut self) -> Status {
            Status::ok()
        }
    }

    #[test]
    fn quorum_of_two_of_three_survives_one_prepare_failure() {
        let commits = Arc::new(AtomicUsize::new(0));
        let targets: Vec<Box<dyn Upload + Send>> = vec![
            Box::new(FlakyUpload { fail_prepare: false, commits: commits.clone() }),
            Box::new(FlakyUpload { fail_prepare: true, commits: commits.clone() }),
            Box::new(FlakyUpload { fail_prepare: false, commits: commits.clone() }),
        ];
        let mut upload = ReplicatedUpload::new(targets, 2);
        assert!(upload.prepare().is_ok());
        assert!(upload.write(b"data").is_ok());
        assert!(upload.commit().is_ok());
        assert_eq!(commits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn below_quorum_fails() {
        let commits = Arc::new(AtomicUsize::new(0));
        let targets: Vec<Box<dyn Upload + Send>> = vec![
            Box::new(FlakyUpload { fail_prepare: true, commits: commits.clone() }),
            Box::new(FlakyUpload { fail_prepare: true, commits: commits.clone() }),
            Box::new(FlakyUpload { fail_prepare: false, commits: commits.clone() }),
        ];
        let mut upload = ReplicatedUpload::new(targets, 2);
        assert_eq!(upload.prepare().cause(), Cause::NetworkError);
    }
}
