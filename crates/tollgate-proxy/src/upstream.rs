//! Upstream addressing and connects.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ProxyError, Result};

/// Splits `host[:port]` into host and port, using `default_port` when the
/// authority names none. Brackets around IPv6 literals are removed.
///
/// ```
/// use tollgate_proxy::upstream::split_authority;
///
/// assert_eq!(split_authority("example.com", 80), ("example.com".to_string(), 80));
/// assert_eq!(split_authority("example.com:8443", 443), ("example.com".to_string(), 8443));
/// assert_eq!(split_authority("[::1]:8080", 80), ("::1".to_string(), 8080));
/// ```
pub fn split_authority(authority: &str, default_port: u16) -> (String, u16) {
    let authority = authority.trim();

    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }

    match authority.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon and no port.
        Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        _ => (authority.to_string(), default_port),
    }
}

/// Opens a TCP connection to `host:port` within `timeout`.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            debug!("Connected to {}:{}", host, port);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: format!("{host}:{port}"),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: format!("{host}:{port}"),
            reason: "connection timed out".to_string(),
        }),
    }
}
