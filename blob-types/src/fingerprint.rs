use std::fmt;

/// Composite key naming one logical chunk across the storage layer.
///
/// Fragment keys actually stored on a Kinetic drive are derived from
/// `chunk_id` alone: `<chunk_id>-<suffix>` (see `blob_types::SUFFIX_MANIFEST`
/// and the striping/erasure fan-outs in `blob-client`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkFingerprint {
    pub namespace: String,
    pub account: String,
    pub container: String,
    pub content_path: String,
    pub chunk_id: String,
}

impl ChunkFingerprint {
    pub fn new(
        namespace: impl Into<String>,
        account: impl Into<String>,
        container: impl Into<String>,
        content_path: impl Into<String>,
        chunk_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            account: account.into(),
            container: container.into(),
            content_path: content_path.into(),
            chunk_id: chunk_id.into(),
        }
    }

    /// Fragment key of the data block with the given sequence number and
    /// payload length, as produced by striping upload.
    pub fn block_key(&self, seq: u64, len: usize) -> String {
        format!("{}-{}-{}", self.chunk_id, seq, len)
    }

    /// Fragment key of the trailing manifest (xattr JSON), written last.
    pub fn manifest_key(&self) -> String {
        format!("{}-{}", self.chunk_id, SUFFIX_MANIFEST)
    }

    /// Fragment key of one erasure-coded fragment by index.
    pub fn fragment_key(&self, index: usize) -> String {
        format!("{}-{}", self.chunk_id, index)
    }

    /// Prefix shared by every fragment key of this chunk; used to build the
    /// inclusive/exclusive GETKEYRANGE bounds for a listing.
    pub fn listing_lower_bound(&self) -> String {
        format!("{}-{}", self.chunk_id, SUFFIX_MANIFEST)
    }

    pub fn listing_upper_bound(&self) -> String {
        format!("{}-X", self.chunk_id)
    }
}

impl fmt::Display for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.namespace, self.account, self.container, self.content_path, self.chunk_id
        )
    }
}

/// Reserved suffix marking the trailing manifest fragment; its presence is
/// the "committed" marker for a striped chunk.
pub const SUFFIX_MANIFEST: &str = "#";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_and_manifest_keys() {
        let fp = ChunkFingerprint::new("ns", "acct", "cnt", "/path", "c");
        assert_eq!(fp.block_key(0, 4), "c-0-4");
        assert_eq!(fp.block_key(1, 4), "c-1-4");
        assert_eq!(fp.manifest_key(), "c-#");
        assert_eq!(fp.fragment_key(5), "c-5");
    }

    #[test]
    fn display_joins_with_slash() {
        let fp = ChunkFingerprint::new("ns", "acct", "cnt", "/path", "c");
        assert_eq!(fp.to_string(), "ns/acct/cnt//path/c");
    }
}
