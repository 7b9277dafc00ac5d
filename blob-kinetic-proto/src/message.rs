//! The Kinetic protobuf envelope: `Message { command_bytes, hmac_auth }`
//! wrapping a serialised `Command { header, body, status }`.
//!
//! These are concrete `prost::Message` derives local to this crate; there is
//! no external `.proto` schema or `build.rs` step, since the wire shape is
//! fixed by the exchange table in the Kinetic RPC layer.

use prost::Message as ProstMessage;

/// Request/response discriminator carried in `CommandHeader::message_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Put = 1,
    PutResponse = 2,
    Get = 3,
    GetResponse = 4,
    GetNext = 5,
    GetNextResponse = 6,
    GetKeyRange = 7,
    GetKeyRangeResponse = 8,
    Delete = 9,
    DeleteResponse = 10,
    GetLog = 11,
    GetLogResponse = 12,
}

/// Mirrors `Cause` (blob-types) on the wire, so a reply can be mapped back
/// without a side-channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Already = 1,
    Forbidden = 2,
    NotFound = 3,
    NetworkError = 4,
    ProtocolError = 5,
    Unsupported = 6,
    InternalError = 7,
}

impl From<StatusCode> for blob_types::Cause {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Ok => blob_types::Cause::Ok,
            StatusCode::Already => blob_types::Cause::Already,
            StatusCode::Forbidden => blob_types::Cause::Forbidden,
            StatusCode::NotFound => blob_types::Cause::NotFound,
            StatusCode::NetworkError => blob_types::Cause::NetworkError,
            StatusCode::ProtocolError => blob_types::Cause::ProtocolError,
            StatusCode::Unsupported => blob_types::Cause::Unsupported,
            StatusCode::InternalError => blob_types::Cause::InternalError,
        }
    }
}

impl From<blob_types::Cause> for StatusCode {
    fn from(cause: blob_types::Cause) -> Self {
        match cause {
            blob_types::Cause::Ok => StatusCode::Ok,
            blob_types::Cause::Already => StatusCode::Already,
            blob_types::Cause::Forbidden => StatusCode::Forbidden,
            blob_types::Cause::NotFound => StatusCode::NotFound,
            blob_types::Cause::NetworkError => StatusCode::NetworkError,
            blob_types::Cause::ProtocolError => StatusCode::ProtocolError,
            blob_types::Cause::Unsupported => StatusCode::Unsupported,
            blob_types::Cause::InternalError => StatusCode::InternalError,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommandHeader {
    #[prost(int64, tag = "1")]
    pub cluster_version: i64,
    #[prost(int64, tag = "2")]
    pub connection_id: i64,
    #[prost(uint64, tag = "3")]
    pub sequence: u64,
    #[prost(int32, tag = "4")]
    pub priority: i32,
    #[prost(int64, tag = "5")]
    pub timeout_ms: i64,
    #[prost(enumeration = "MessageType", tag = "6")]
    pub message_type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyValue {
    #[prost(bytes, tag = "1")]
    pub key: Vec<u8>,
    /// SHA-1 digest of the value; set on PUT, echoed on no other exchange.
    #[prost(bytes, tag = "2")]
    pub tag: Vec<u8>,
    /// Checksum algorithm identifier; `1` denotes SHA-1, the only one this
    /// layer emits.
    #[prost(int32, tag = "3")]
    pub algorithm: i32,
    /// `1` = WRITEBACK (default), `2` = WRITETHROUGH, `3` = FLUSH.
    #[prost(int32, tag = "4")]
    pub synchronization: i32,
    /// Precondition version; empty means "no precondition" (per the
    /// resolved Open Question on `PreVersion`).
    #[prost(bytes, tag = "5")]
    pub db_version: Vec<u8>,
    /// Version to store alongside the value after a successful PUT.
    #[prost(bytes, tag = "6")]
    pub new_version: Vec<u8>,
}

pub const SYNC_WRITEBACK: i32 = 1;
pub const SYNC_WRITETHROUGH: i32 = 2;
pub const SYNC_FLUSH: i32 = 3;
pub const ALGORITHM_SHA1: i32 = 1;

#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyRange {
    #[prost(bytes, tag = "1")]
    pub start_key: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub end_key: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub start_key_inclusive: bool,
    #[prost(bool, tag = "4")]
    pub end_key_inclusive: bool,
    #[prost(int32, tag = "5")]
    pub max_returned: i32,
    /// Populated on the reply only.
    #[prost(bytes, repeated, tag = "6")]
    pub keys: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetLog {
    #[prost(int32, repeated, tag = "1")]
    pub types: Vec<i32>,
    #[prost(float, tag = "2")]
    pub cpu_percent: f32,
    #[prost(float, repeated, tag = "3")]
    pub temperatures: Vec<f32>,
    #[prost(float, tag = "4")]
    pub space_free_percent: f32,
    #[prost(float, tag = "5")]
    pub io_percent: f32,
}

pub const GETLOG_CAPACITIES: i32 = 0;
pub const GETLOG_TEMPERATURES: i32 = 1;
pub const GETLOG_UTILIZATIONS: i32 = 2;

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommandBody {
    #[prost(message, optional, tag = "1")]
    pub key_value: Option<KeyValue>,
    #[prost(message, optional, tag = "2")]
    pub range: Option<KeyRange>,
    #[prost(message, optional, tag = "3")]
    pub get_log: Option<GetLog>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommandStatus {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub detailed_message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Command {
    #[prost(message, required, tag = "1")]
    pub header: CommandHeader,
    #[prost(message, optional, tag = "2")]
    pub body: Option<CommandBody>,
    #[prost(message, optional, tag = "3")]
    pub status: Option<CommandStatus>,
}

impl Command {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        ProstMessage::encode_to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        ProstMessage::decode(bytes)
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HmacAuth {
    #[prost(int64, tag = "1")]
    pub identity: i64,
    #[prost(bytes, tag = "2")]
    pub hmac: Vec<u8>,
}

/// Outer envelope carried in the frame's message section.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(bytes, tag = "1")]
    pub command_bytes: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub hmac_auth: Option<HmacAuth>,
}

impl Envelope {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        ProstMessage::encode_to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        ProstMessage::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_protobuf() {
        let cmd = Command {
            header: CommandHeader {
                cluster_version: 0,
                connection_id: 42,
                sequence: 7,
                priority: 0,
                timeout_ms: 1000,
                message_type: MessageType::Put as i32,
            },
            body: Some(CommandBody {
                key_value: Some(KeyValue {
                    key: b"c-0-4".to_vec(),
                    tag: vec![0u8; 20],
                    algorithm: ALGORITHM_SHA1,
                    synchronization: SYNC_WRITEBACK,
                    db_version: Vec::new(),
                    new_version: Vec::new(),
                }),
                range: None,
                get_log: None,
            }),
            status: None,
        };

        let bytes = cmd.encode_to_vec();
        let decoded = Command::decode(&bytes).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.header.sequence, 7);
    }

    #[test]
    fn status_code_maps_round_trip_through_cause() {
        for code in [
            StatusCode::Ok,
            StatusCode::Already,
            StatusCode::Forbidden,
            StatusCode::NotFound,
            StatusCode::NetworkError,
            StatusCode::ProtocolError,
            StatusCode::Unsupported,
            StatusCode::InternalError,
        ] {
            let cause: blob_types::Cause = code.into();
            let back: StatusCode = cause.into();
            assert_eq!(code, back);
        }
    }
}
