//! SHA-1 HMAC helpers for the Kinetic RPC layer's authentication tag.

use anyhow::Error;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;

/// Computes `HMAC-SHA1(secret, data)`.
///
/// Used by `blob-kinetic-proto` to sign `be32(len(command_bytes)) ||
/// command_bytes` exactly as emitted on the wire, and to verify the same
/// tag on every reply.
pub fn hmac_sha1(secret: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let key = PKey::hmac(secret)?;
    let mut signer = Signer::new(MessageDigest::sha1(), &key)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// Constant-time comparison, to avoid leaking timing information about how
/// many leading bytes of an HMAC matched.
pub fn hmac_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha1(b"secret", b"hello").unwrap();
        let b = hmac_sha1(b"secret", b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn hmac_differs_on_different_keys() {
        let a = hmac_sha1(b"secret1", b"hello").unwrap();
        let b = hmac_sha1(b"secret2", b"hello").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hmac_eq_matches_equal_slices() {
        let a = hmac_sha1(b"secret", b"hello").unwrap();
        let b = hmac_sha1(b"secret", b"hello").unwrap();
        assert!(hmac_eq(&a, &b));
        assert!(!hmac_eq(&a, b"different length value"));
    }
}
