//! The uniform blob transaction contract: `Upload`, `Download`, `Removal`
//! and `Listing`, plus the shared three-phase state machine every back-end
//! implements on top of.

use blob_types::{Cause, Slice, Status};

/// `Init -> Prepared -> Done`. Commit and Abort are mutually exclusive, each
/// reachable only from `Prepared`, and each reachable at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Init,
    Prepared,
    Done,
}

impl TxState {
    /// Validates and performs the `Init -> Prepared` transition, returning
    /// `InternalError` if called out of order.
    pub fn prepare(&mut self) -> Result<(), Status> {
        match self {
            TxState::Init => {
                *self = TxState::Prepared;
                Ok(())
            }
            _ => Err(Status::new(Cause::InternalError)),
        }
    }

    /// Validates and performs the `Prepared -> Done` transition used by
    /// both Commit and Abort; the specific caller is responsible for not
    /// calling this twice (the second call finds `Done` and rejects).
    pub fn finish(&mut self) -> Result<(), Status> {
        match self {
            TxState::Prepared => {
                *self = TxState::Done;
                Ok(())
            }
            _ => Err(Status::new(Cause::InternalError)),
        }
    }

    /// Validates that a Write/Read call is permitted (`Prepared` only).
    pub fn require_prepared(&self) -> Result<(), Status> {
        match self {
            TxState::Prepared => Ok(()),
            _ => Err(Status::new(Cause::InternalError)),
        }
    }

    pub fn require_init(&self) -> Result<(), Status> {
        match self {
            TxState::Init => Ok(()),
            _ => Err(Status::new(Cause::InternalError)),
        }
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, TxState::Prepared)
    }
}

impl Default for TxState {
    fn default() -> Self {
        TxState::Init
    }
}

/// One blob transaction writing a payload (and xattrs) to a back-end.
///
/// `Init -> [set_xattr]* -> prepare() -> [write()]* -> commit()|abort()`.
/// Implementations must reject out-of-order calls with
/// `Status(Cause::InternalError)` rather than panic.
pub trait Upload {
    /// Registers a key/value pair to be persisted alongside the payload.
    /// Valid only in `Init`.
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status;

    /// Reserves the destination. Valid only in `Init`; transitions to
    /// `Prepared` on success.
    fn prepare(&mut self) -> Status;

    /// Appends payload bytes. The buffer is logically consumed immediately;
    /// whether the caller may reuse it afterwards is this back-end's own
    /// contract (documented per implementation). Valid only in `Prepared`.
    fn write(&mut self, bytes: &[u8]) -> Status;

    /// Atomically promotes the pending artifact to its final name. Valid
    /// only in `Prepared`; transitions to `Done`.
    fn commit(&mut self) -> Status;

    /// Best-effort destruction of the pending artifact. Valid only in
    /// `Prepared`; always transitions to `Done`.
    fn abort(&mut self) -> Status;
}

/// One blob transaction reading a payload back from a back-end.
pub trait Download {
    /// Restricts the read to `[offset, offset+size)`. Must precede
    /// `prepare()`. `Cause::Unsupported` is a permitted reply.
    fn set_range(&mut self, offset: u64, size: u64) -> Status;

    /// Opens and validates the source. `Cause::NotFound` is permitted.
    fn prepare(&mut self) -> Status;

    /// True once the stream is exhausted.
    fn is_eof(&self) -> bool;

    /// Appends the next chunk of bytes to `slice`. A zero-byte read with
    /// `is_eof() == true` marks end-of-stream.
    fn read(&mut self, slice: &mut Slice) -> Status;
}

/// Deletion of a single previously-uploaded blob.
pub trait Removal {
    /// Validates the target exists. `Cause::NotFound` if absent.
    fn prepare(&mut self) -> Status;

    /// Performs the physical delete. Irreversible: an `abort()` after a
    /// successful `commit()` is `Cause::InternalError`.
    fn commit(&mut self) -> Status;

    fn abort(&mut self) -> Status;
}

/// Enumeration of the fragments making up one or more chunks on a back-end.
pub trait Listing {
    fn prepare(&mut self) -> Status;

    /// Yields one `(service_id, key)` pair per call via the out parameters,
    /// returning `false` once exhausted. Ordering is per back-end.
    fn next(&mut self, service_id: &mut String, key: &mut String) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut state = TxState::default();
        assert!(state.require_prepared().is_err());
        assert!(state.finish().is_err());

        state.prepare().unwrap();
        assert!(state.prepare().is_err());
        assert!(state.require_prepared().is_ok());

        state.finish().unwrap();
        assert!(state.finish().is_err());
        assert!(state.require_prepared().is_err());
    }
}
