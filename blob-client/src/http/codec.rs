//! Shared HTTP codec concerns (C4): status mapping and the vendor header
//! names used by rawx uploads. Actual byte-level I/O lives in
//! `sync_client`/`reactive_client`; this module only holds the
//! back-end-agnostic rules.

use blob_types::{Cause, Status};

/// Maps an HTTP status code onto `Cause`, per §4.2: 2xx -> OK, 4xx ->
/// Forbidden/NotFound, 5xx -> InternalError.
pub fn status_from_http(code: u16) -> Status {
    match code {
        200..=299 => Status::ok(),
        403 => Status::new(Cause::Forbidden),
        404 => Status::new(Cause::NotFound),
        400..=499 => Status::with_message(Cause::Forbidden, format!("HTTP {}", code)),
        500..=599 => Status::with_message(Cause::InternalError, format!("HTTP {}", code)),
        other => Status::with_message(Cause::ProtocolError, format!("unexpected HTTP status {}", other)),
    }
}

/// Vendor header prefix for chunk metadata on rawx uploads.
pub const CHUNK_META_PREFIX: &str = "X-oio-chunk-meta-";

pub fn chunk_meta_header(suffix: &str) -> String {
    format!("{}{}", CHUNK_META_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_2xx_to_ok() {
        assert!(status_from_http(200).is_ok());
        assert!(status_from_http(204).is_ok());
    }

    #[test]
    fn maps_4xx_by_code() {
        assert_eq!(status_from_http(403).cause(), Cause::Forbidden);
        assert_eq!(status_from_http(404).cause(), Cause::NotFound);
        assert_eq!(status_from_http(409).cause(), Cause::Forbidden);
    }

    #[test]
    fn maps_5xx_to_internal_error() {
        assert_eq!(status_from_http(500).cause(), Cause::InternalError);
    }

    #[test]
    fn builds_vendor_header_name() {
        assert_eq!(chunk_meta_header("chunk-id"), "X-oio-chunk-meta-chunk-id");
    }
}
