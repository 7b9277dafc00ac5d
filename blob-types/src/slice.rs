/// Owned, contiguous, append-only byte buffer.
///
/// `Slice` is the payload currency between a transaction and its caller:
/// `Upload::write` consumes one, `Download::read` fills one. Capacity
/// growth is an implementation detail; callers only ever see `data()` and
/// `len()`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Slice {
    buf: Vec<u8>,
}

impl Slice {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { buf: bytes.into() }
    }

    /// Appends `bytes` to the end of the buffer. Adjacent appends coalesce
    /// into the same backing allocation as capacity allows.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl From<Vec<u8>> for Slice {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_coalesces() {
        let mut s = Slice::new();
        s.append(b"abc");
        s.append(b"def");
        assert_eq!(s.data(), b"abcdef");
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn empty_slice_has_zero_len() {
        let s = Slice::new();
        assert!(s.is_empty());
        assert_eq!(s.len(), 0);
    }
}
