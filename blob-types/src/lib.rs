//! Core data types shared by the blob client crates.
//!
//! This crate has no I/O of its own: it defines the vocabulary (`Status`,
//! `Cause`, `Slice`, `Url`, `Range`, `ChunkFingerprint`, `Config`) that the
//! transaction contract and every back-end in `blob-client` are built on.

mod config;
pub use config::Config;

mod fingerprint;
pub use fingerprint::{ChunkFingerprint, SUFFIX_MANIFEST};

mod range;
pub use range::Range;

mod slice;
pub use slice::Slice;

mod status;
pub use status::{Cause, Status};

mod url;
pub use url::{RawxUrlSet, Url};
