//! Synchronous HTTP codec and back-end (C4 sync mode, C7 HTTP sync
//! back-end): a thin request/reply object over a blocking `TcpStream`.
//! Prepare sends headers; Write streams a chunked body; Commit sends the
//! terminating zero chunk plus trailers and reads the reply; Abort closes
//! the socket.

use std::collections::BTreeMap;
use std::io::{BufReader, Read, Write as _};
use std::net::TcpStream;

use blob_types::{Cause, Slice, Status};
use log::{debug, trace};
use openssl::hash::{Hasher, MessageDigest};

use super::codec::status_from_http;
use crate::transaction::{Download, Removal, Upload};
use crate::TxState;

/// Target of an HTTP sync transaction: host, port, path, and the vendor
/// headers to attach.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HttpTarget {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }
}

fn connect(target: &HttpTarget) -> std::io::Result<TcpStream> {
    TcpStream::connect((target.host.as_str(), target.port))
}

fn io_status(err: &std::io::Error) -> Status {
    Status::with_message(Cause::NetworkError, err.to_string())
}

/// `Upload` implementation streaming a chunked-encoded PUT body to a rawx
/// server synchronously.
pub struct HttpSyncUpload {
    target: HttpTarget,
    state: TxState,
    stream: Option<TcpStream>,
    headers: BTreeMap<String, String>,
    hasher: Hasher,
    chunk_size: u64,
}

impl HttpSyncUpload {
    pub fn new(target: HttpTarget) -> Self {
        Self {
            target,
            state: TxState::default(),
            stream: None,
            headers: BTreeMap::new(),
            hasher: Hasher::new(MessageDigest::sha1()).expect("openssl sha1 hasher"),
            chunk_size: 0,
        }
    }
}

impl Upload for HttpSyncUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        let header = super::codec::chunk_meta_header(key);
        self.headers
            .insert(header, String::from_utf8_lossy(value).into_owned());
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        debug!("http sync upload prepare: {}{}", self.target.host, self.target.path);

        let mut stream = match connect(&self.target) {
            Ok(s) => s,
            Err(err) => return io_status(&err),
        };

        let mut request = format!(
            "PUT {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: blob-client/{}\r\nTransfer-Encoding: chunked\r\nTrailer: chunk-size,chunk-hash\r\n",
            self.target.path, self.target.host, blob_buildcfg::BLOB_CLIENT_PKG_VERSION
        );
        for (key, value) in &self.headers {
            request.push_str(key);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        if let Err(err) = stream.write_all(request.as_bytes()) {
            return io_status(&err);
        }

        self.stream = Some(stream);
        Status::ok()
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        trace!("http sync upload write {} bytes", bytes.len());
        let stream = self.stream.as_mut().expect("stream set in prepare");
        let chunk_header = format!("{:x}\r\n", bytes.len());
        if let Err(err) = stream
            .write_all(chunk_header.as_bytes())
            .and_then(|_| stream.write_all(bytes))
            .and_then(|_| stream.write_all(b"\r\n"))
        {
            return io_status(&err);
        }
        if let Err(err) = self.hasher.update(bytes) {
            return Status::with_message(Cause::InternalError, err.to_string());
        }
        self.chunk_size += bytes.len() as u64;
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let mut stream = self.stream.take().expect("stream set in prepare");
        let digest = match self.hasher.finish() {
            Ok(d) => d,
            Err(err) => return Status::with_message(Cause::InternalError, err.to_string()),
        };
        let chunk_hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let trailers = format!("0\r\nchunk-size: {}\r\nchunk-hash: {}\r\n\r\n", self.chunk_size, chunk_hash);
        if let Err(err) = stream.write_all(trailers.as_bytes()) {
            return io_status(&err);
        }

        let mut reader = BufReader::new(stream);
        read_status_line(&mut reader)
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        self.stream = None;
        Status::ok()
    }
}

impl Drop for HttpSyncUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

fn read_status_line(reader: &mut BufReader<TcpStream>) -> Status {
    use std::io::BufRead;
    let mut line = String::new();
    if let Err(err) = reader.read_line(&mut line) {
        return io_status(&err);
    }
    let code: u16 = line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    // Drain headers; this sync codec does not need them beyond the status line.
    loop {
        let mut header_line = String::new();
        match reader.read_line(&mut header_line) {
            Ok(0) => break,
            Ok(_) if header_line == "\r\n" || header_line.is_empty() => break,
            Ok(_) => continue,
            Err(err) => return io_status(&err),
        }
    }

    status_from_http(code)
}

/// `Removal` implementation issuing a synchronous HTTP DELETE.
pub struct HttpSyncRemoval {
    target: HttpTarget,
    state: TxState,
}

impl HttpSyncRemoval {
    pub fn new(target: HttpTarget) -> Self {
        Self {
            target,
            state: TxState::default(),
        }
    }
}

impl Removal for HttpSyncRemoval {
    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let mut stream = match connect(&self.target) {
            Ok(s) => s,
            Err(err) => return io_status(&err),
        };
        let request = format!(
            "DELETE {} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\n\r\n",
            self.target.path, self.target.host
        );
        if let Err(err) = stream.write_all(request.as_bytes()) {
            return io_status(&err);
        }
        let mut reader = BufReader::new(stream);
        read_status_line(&mut reader)
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        Status::ok()
    }
}

/// `Download` implementation issuing a synchronous HTTP GET and reading the
/// body to completion (Content-Length framed; chunked responses are not
/// produced by this crate's own sync upload path but are accepted defensively).
pub struct HttpSyncDownload {
    target: HttpTarget,
    state: TxState,
    reader: Option<BufReader<TcpStream>>,
    remaining: Option<u64>,
    eof: bool,
}

impl HttpSyncDownload {
    pub fn new(target: HttpTarget) -> Self {
        Self {
            target,
            state: TxState::default(),
            reader: None,
            remaining: None,
            eof: false,
        }
    }
}

impl Download for HttpSyncDownload {
    fn set_range(&mut self, _offset: u64, _size: u64) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        Status::new(Cause::Unsupported)
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let mut stream = match connect(&self.target) {
            Ok(s) => s,
            Err(err) => return io_status(&err),
        };
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            self.target.path, self.target.host
        );
        if let Err(err) = stream.write_all(request.as_bytes()) {
            return io_status(&err);
        }

        let mut reader = BufReader::new(stream);
        use std::io::BufRead;
        let mut line = String::new();
        if let Err(err) = reader.read_line(&mut line) {
            return io_status(&err);
        }
        let code: u16 = line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut content_length = None;
        loop {
            let mut header_line = String::new();
            match reader.read_line(&mut header_line) {
                Ok(0) => break,
                Ok(_) if header_line == "\r\n" => break,
                Ok(_) => {
                    if let Some((name, value)) = header_line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().ok();
                        }
                    }
                }
                Err(err) => return io_status(&err),
            }
        }

        let status = status_from_http(code);
        if status.is_ok() {
            self.remaining = content_length;
            self.reader = Some(reader);
        }
        status
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn read(&mut self, slice: &mut Slice) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        let reader = self.reader.as_mut().expect("reader set in prepare");
        let want = self.remaining.map(|r| r.min(64 * 1024) as usize).unwrap_or(64 * 1024);
        if want == 0 {
            self.eof = true;
            return Status::ok();
        }
        let mut buf = vec![0u8; want];
        match reader.read(&mut buf) {
            Ok(0) => {
                self.eof = true;
                Status::ok()
            }
            Ok(n) => {
                slice.append(&buf[..n]);
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= n as u64;
                }
                Status::ok()
            }
            Err(err) => io_status(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_before_prepare_is_internal_error() {
        let mut upload = HttpSyncUpload::new(HttpTarget::new("127.0.0.1", 9100, "/c"));
        assert_eq!(upload.write(b"x").cause(), Cause::InternalError);
    }

    #[test]
    fn http_target_carries_host_port_path() {
        let target = HttpTarget::new("rawx1", 9100, "/chunk123");
        assert_eq!(target.host, "rawx1");
        assert_eq!(target.port, 9100);
        assert_eq!(target.path, "/chunk123");
    }
}
