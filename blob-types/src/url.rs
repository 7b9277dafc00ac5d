use std::cmp::Ordering;
use std::fmt;

use anyhow::{bail, Error};

/// A parsed rawx URL: `scheme://host:port/chunk_id`, or its shortened form
/// `host:port` (scheme defaults to `http` and `chunk_id` is empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    scheme: String,
    host: String,
    port: u16,
    chunk_id: String,
}

impl Url {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16, chunk_id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            chunk_id: chunk_id.into(),
        }
    }

    /// Parses either `scheme://host:port/chunk_id` or the shortened
    /// `host:port` form.
    pub fn parse(text: &str) -> Result<Self, Error> {
        if text.contains("://") {
            let (scheme, rest) = text.split_once("://").unwrap();
            let (hostport, chunk_id) = match rest.split_once('/') {
                Some((hostport, chunk_id)) => (hostport, chunk_id),
                None => (rest, ""),
            };
            let (host, port) = split_host_port(hostport)?;
            return Ok(Url {
                scheme: scheme.to_string(),
                host,
                port,
                chunk_id: chunk_id.to_string(),
            });
        }

        let (host, port) = split_host_port(text)?;
        Ok(Url {
            scheme: "http".to_string(),
            host,
            port,
            chunk_id: String::new(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_host_port(hostport: &str) -> Result<(String, u16), Error> {
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("missing port in '{}'", hostport))?;
    let port: u16 = port.parse().map_err(|_| anyhow::anyhow!("invalid port in '{}'", hostport))?;
    if host.is_empty() {
        bail!("empty host in '{}'", hostport);
    }
    Ok((host.to_string(), port))
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chunk_id.is_empty() {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "{}://{}:{}/{}", self.scheme, self.host, self.port, self.chunk_id)
        }
    }
}

/// A `Url` paired with its position in an ordered set of rawx targets
/// (striping / replication), used to determine round-robin and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawxUrlSet {
    pub url: Url,
    pub chunk_number: u32,
}

impl RawxUrlSet {
    pub fn new(url: Url, chunk_number: u32) -> Self {
        Self { url, chunk_number }
    }
}

impl PartialOrd for RawxUrlSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RawxUrlSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chunk_number.cmp(&other.chunk_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_url() {
        let u = Url::parse("http://drive1:9100/chunk123").unwrap();
        assert_eq!(u.scheme(), "http");
        assert_eq!(u.host(), "drive1");
        assert_eq!(u.port(), 9100);
        assert_eq!(u.chunk_id(), "chunk123");
        assert_eq!(u.to_string(), "http://drive1:9100/chunk123");
    }

    #[test]
    fn parses_shortened_host_port() {
        let u = Url::parse("drive1:9100").unwrap();
        assert_eq!(u.chunk_id(), "");
        assert_eq!(u.to_string(), "drive1:9100");
    }

    #[test]
    fn rejects_missing_port() {
        assert!(Url::parse("drive1").is_err());
    }

    #[test]
    fn rawx_url_set_orders_by_chunk_number() {
        let mut v = vec![
            RawxUrlSet::new(Url::parse("a:1").unwrap(), 2),
            RawxUrlSet::new(Url::parse("b:1").unwrap(), 0),
            RawxUrlSet::new(Url::parse("c:1").unwrap(), 1),
        ];
        v.sort();
        let numbers: Vec<u32> = v.iter().map(|r| r.chunk_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }
}
