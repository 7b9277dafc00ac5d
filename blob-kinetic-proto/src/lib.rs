//! Kinetic wire frame, protobuf command envelope and per-exchange
//! request/reply (de)serialisation.
//!
//! This crate is the external-collaborator boundary named by the
//! specification made concrete: the frame header (§6), the protobuf
//! envelope (§4.3), and the six exchange shapes live here so that
//! `blob-client`'s coroutine client (C6) only ever deals with
//! `ExchangeRequest`/`ExchangeReply` values and raw bytes to write/read.

pub mod exchange;
pub mod frame;
pub mod message;

pub use exchange::{build_request_frame, parse_reply_frame, Context, ExchangeReply, ExchangeRequest};
pub use frame::{Frame, FRAME_HEADER_LEN, FRAME_MAGIC};
