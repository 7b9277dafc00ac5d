//! Client-side blob access library.
//!
//! Four uniform operations -- `Upload`, `Download`, `Removal`, `Listing`
//! ([`transaction`]) -- are implemented by a handful of single-target
//! back-ends ([`backends`], [`http`]) and wired together by three
//! multi-target fan-out engines: striping over Kinetic drives
//! ([`striping`]), parallel listing/removal and replicated broadcast with a
//! quorum rule ([`fanout`]), and erasure-coded (k, m) upload/download
//! ([`erasure`]).
//!
//! The Kinetic coroutine client ([`kinetic_client`]) multiplexes many
//! concurrent request/reply exchanges for one drive over a single TCP
//! connection; [`kinetic_client::ClientFactory`] hands out one shared
//! client per drive URL.

pub mod transaction;
pub use transaction::{Download, Listing, Removal, TxState, Upload};

pub mod backends;
pub mod http;

pub mod kinetic_client;
pub use kinetic_client::{ClientFactory, KineticClient};

pub mod striping;

pub mod fanout;

pub mod erasure;

pub mod pipe_to_stream;
