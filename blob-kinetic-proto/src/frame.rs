//! The 9-byte fixed frame header wrapping a Kinetic message.
//!
//! ```text
//! offset 0  : 0x46 ('F')
//! offset 1-4: big-endian u32 message_length
//! offset 5-8: big-endian u32 value_length
//! offset 9..: protobuf-encoded Message
//! offset 9+message_length..: opaque value bytes
//! ```

use anyhow::{bail, Error};

pub const FRAME_MAGIC: u8 = b'F';
pub const FRAME_HEADER_LEN: usize = 9;

/// A frame ready for transmission, or as parsed off the wire: message bytes
/// (the protobuf envelope) and value bytes (the opaque payload, used by
/// PUT/GET only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: Vec<u8>,
    pub value: Vec<u8>,
}

impl Frame {
    pub fn new(message: Vec<u8>, value: Vec<u8>) -> Self {
        Self { message, value }
    }

    /// Serialises `self` as the bytes that go on the wire, validating
    /// `max_frame_size` first.
    pub fn encode(&self, max_frame_size: u32) -> Result<Vec<u8>, Error> {
        let msg_len = self.message.len();
        let val_len = self.value.len();
        if msg_len as u64 > max_frame_size as u64 || val_len as u64 > max_frame_size as u64 {
            bail!(
                "frame too large: message={} value={} max={}",
                msg_len,
                val_len,
                max_frame_size
            );
        }

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + msg_len + val_len);
        out.push(FRAME_MAGIC);
        out.extend_from_slice(&(msg_len as u32).to_be_bytes());
        out.extend_from_slice(&(val_len as u32).to_be_bytes());
        out.extend_from_slice(&self.message);
        out.extend_from_slice(&self.value);
        Ok(out)
    }

    /// Parses the fixed 9-byte header, returning the lengths to read next.
    /// Callers read exactly `header.0` message bytes then `header.1` value
    /// bytes off the same stream.
    pub fn decode_header(header: &[u8; FRAME_HEADER_LEN], max_frame_size: u32) -> Result<(u32, u32), Error> {
        if header[0] != FRAME_MAGIC {
            bail!("bad frame magic byte: {:#x}", header[0]);
        }
        let msg_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        let val_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        if msg_len > max_frame_size || val_len > max_frame_size {
            bail!(
                "frame exceeds max_frame_size ({} > {} or {} > {})",
                msg_len,
                max_frame_size,
                val_len,
                max_frame_size
            );
        }
        Ok((msg_len, val_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_header_round_trips() {
        let frame = Frame::new(vec![1, 2, 3], vec![4, 5, 6, 7]);
        let bytes = frame.encode(1024).unwrap();
        assert_eq!(bytes[0], FRAME_MAGIC);

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
        let (msg_len, val_len) = Frame::decode_header(&header, 1024).unwrap();
        assert_eq!(msg_len, 3);
        assert_eq!(val_len, 4);
        assert_eq!(&bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 3], &[1, 2, 3]);
        assert_eq!(&bytes[FRAME_HEADER_LEN + 3..], &[4, 5, 6, 7]);
    }

    #[test]
    fn rejects_bad_magic() {
        let header = [b'X', 0, 0, 0, 3, 0, 0, 0, 4];
        assert!(Frame::decode_header(&header, 1024).is_err());
    }

    #[test]
    fn rejects_oversized_frame() {
        let frame = Frame::new(vec![0u8; 100], vec![]);
        assert!(frame.encode(10).is_err());

        let header = [b'F', 0, 0, 4, 0, 0, 0, 0, 0];
        assert!(Frame::decode_header(&header, 1024).is_err());
    }
}
