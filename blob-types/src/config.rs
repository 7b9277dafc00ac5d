use std::time::Duration;

/// Process-wide tunables, threaded explicitly into every builder. Never
/// stored behind a `lazy_static`/`OnceCell` global: callers own a `Config`
/// and pass it down, the way `pbs-client::HttpClientOptions` is built and
/// handed to `HttpClient::new` rather than read from ambient state.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Striping upload block size, in bytes.
    pub block_size: usize,
    /// Maximum Kinetic frame size accepted on receive.
    pub max_frame_size: u32,
    /// Mode used when the Local back-end creates missing parent directories.
    pub dir_mode: u32,
    /// Mode used when the Local back-end creates the final file.
    pub file_mode: u32,
    /// Absolute deadline given to a Kinetic exchange when none is specified.
    pub rpc_deadline: Duration,
    /// Number of concurrent DELETEs kept in flight during parallel removal.
    pub removal_parallelism: usize,
    /// Byte budget for unacknowledged egress on the HTTP reactive back-end.
    pub http_egress_limit: usize,
    /// Byte budget for buffered-but-unconsumed ingress on the HTTP reactive back-end.
    pub http_ingress_limit: usize,
    /// Read buffer size used by the Local back-end's Download.
    pub local_read_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 512 * 1024,
            max_frame_size: 1024 * 1024,
            dir_mode: 0o755,
            file_mode: 0o644,
            rpc_deadline: Duration::from_secs(30),
            removal_parallelism: 8,
            http_egress_limit: 1024 * 1024,
            http_ingress_limit: 1024 * 1024,
            local_read_buffer: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_rpc_deadline(mut self, deadline: Duration) -> Self {
        self.rpc_deadline = deadline;
        self
    }

    pub fn with_removal_parallelism(mut self, parallelism: usize) -> Self {
        self.removal_parallelism = parallelism;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.block_size, 512 * 1024);
        assert_eq!(c.max_frame_size, 1024 * 1024);
        assert_eq!(c.removal_parallelism, 8);
        assert_eq!(c.rpc_deadline, Duration::from_secs(30));
    }

    #[test]
    fn builder_overrides_fields() {
        let c = Config::default().with_block_size(4).with_removal_parallelism(2);
        assert_eq!(c.block_size, 4);
        assert_eq!(c.removal_parallelism, 2);
    }
}
