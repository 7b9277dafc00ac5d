//! HTTP codec client (C4) and the sync/reactive rawx back-ends built on it
//! (C7).

pub mod codec;
pub mod reactive_client;
pub mod sync_client;
