//! Fragment framing (§4.9, §6): each erasure fragment is opaque to the
//! storage back-end but carries its own `b"EC01"` magic, a big-endian
//! fragment index, a big-endian payload length and a CRC32 of the payload,
//! validated before decoding -- mirroring the magic+CRC framing
//! `pbs-datastore::data_blob` uses for its own on-disk chunks.

use anyhow::{anyhow, bail, Error};

pub const MAGIC: &[u8; 4] = b"EC01";
pub const HEADER_LEN: usize = 4 + 4 + 4 + 4;

pub struct Fragment {
    pub index: u32,
    pub payload: Vec<u8>,
}

/// Frames `payload` as fragment `index`.
pub fn frame(index: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validates the magic, length and CRC32 before returning the payload.
pub fn unframe(bytes: &[u8]) -> Result<Fragment, Error> {
    if bytes.len() < HEADER_LEN {
        bail!("erasure fragment too short: {} bytes", bytes.len());
    }
    if &bytes[0..4] != MAGIC {
        bail!("erasure fragment has bad magic");
    }
    let index = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let len = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let crc = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + len)
        .ok_or_else(|| anyhow!("erasure fragment truncated: expected {} payload bytes", len))?;
    if crc32fast::hash(payload) != crc {
        bail!("erasure fragment {} failed its CRC32 check", index);
    }
    Ok(Fragment {
        index,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_unframe_round_trips() {
        let framed = frame(3, b"parity bytes");
        let fragment = unframe(&framed).unwrap();
        assert_eq!(fragment.index, 3);
        assert_eq!(fragment.payload, b"parity bytes");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut framed = frame(0, b"data");
        framed[0] = b'X';
        assert!(unframe(&framed).is_err());
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut framed = frame(0, b"data");
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert!(unframe(&framed).is_err());
    }
}
