//! CONNECT tunnel relay.
//!
//! Opens a TCP connection to the requested authority, answers
//! `200 Connection Established`, and then copies bytes in both directions
//! until either side closes. Nothing inside the tunnel is parsed; TLS stays
//! end to end between client and origin.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use tollgate_core::ParsedRequest;

use crate::error::Result;
use crate::responses;
use crate::upstream;

/// Port assumed when a CONNECT authority names none.
pub const DEFAULT_TUNNEL_PORT: u16 = 443;

const RELAY_BUFFER: usize = 8 * 1024;

/// Byte counts of a closed tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub to_upstream: u64,
    pub to_client: u64,
}

/// Host and port named by a CONNECT request target.
pub fn connect_target(request: &ParsedRequest) -> (String, u16) {
    upstream::split_authority(&request.target, DEFAULT_TUNNEL_PORT)
}

/// Connects to `host:port` and relays until either side closes.
///
/// `early_data` holds bytes the client sent after the CONNECT head, which
/// are delivered upstream before relaying starts. An unreachable target
/// gets a `502` and no tunnel.
pub async fn open<C>(
    client: &mut C,
    host: &str,
    port: u16,
    early_data: &[u8],
    connect_timeout: Duration,
) -> Result<TunnelStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut origin = match upstream::connect(host, port, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = responses::send_status(client, 502).await;
            return Err(e);
        }
    };

    responses::send(client, responses::CONNECTION_ESTABLISHED).await?;
    let stats = relay(client, &mut origin, early_data).await?;
    debug!(
        "Tunnel to {}:{} closed ({} bytes up, {} bytes down)",
        host, port, stats.to_upstream, stats.to_client
    );
    Ok(stats)
}

/// Copies bytes both ways between an established client and origin.
///
/// Returns as soon as either side reaches EOF or fails; the caller then
/// drops both sockets, so a half-closed tunnel never lingers.
pub async fn relay<C, U>(client: &mut C, origin: &mut U, early_data: &[u8]) -> Result<TunnelStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    if !early_data.is_empty() {
        origin.write_all(early_data).await?;
    }

    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut origin_rx, mut origin_tx) = tokio::io::split(origin);
    let mut to_upstream = early_data.len() as u64;
    let mut to_client = 0u64;

    let closed = tokio::select! {
        result = pump(&mut client_rx, &mut origin_tx, &mut to_upstream) => result.map(|()| "client"),
        result = pump(&mut origin_rx, &mut client_tx, &mut to_client) => result.map(|()| "origin"),
    };
    match closed {
        Ok(side) => debug!("Tunnel {} side closed", side),
        Err(e) => debug!("Tunnel ended with error: {}", e),
    }

    Ok(TunnelStats {
        to_upstream,
        to_client,
    })
}

/// Copies `reader` into `writer` until EOF, counting bytes into `copied`.
async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[test]
    fn target_defaults_to_443() {
        let request = ParsedRequest::parse(b"CONNECT example.com HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(connect_target(&request), ("example.com".into(), 443));

        let request =
            ParsedRequest::parse(b"CONNECT example.com:8443 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(connect_target(&request), ("example.com".into(), 8443));
    }

    #[tokio::test]
    async fn relay_copies_both_ways_until_close() {
        let (mut client_end, mut proxy_client) = duplex(1024);
        let (mut proxy_origin, mut origin_end) = duplex(1024);

        let relay_task =
            tokio::spawn(async move { relay(&mut proxy_client, &mut proxy_origin, b"early").await });

        client_end.write_all(b" hello").await.unwrap();
        let mut buf = [0u8; 11];
        origin_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early hello");

        origin_end.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client_end);
        let mut rest = Vec::new();
        origin_end.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(origin_end);

        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(
            stats,
            TunnelStats {
                to_upstream: 11,
                to_client: 5
            }
        );
    }

    #[tokio::test]
    async fn relay_ends_when_client_closes_and_origin_stays_idle() {
        let (mut client_end, mut proxy_client) = duplex(1024);
        let (mut proxy_origin, mut origin_end) = duplex(1024);

        let relay_task =
            tokio::spawn(async move { relay(&mut proxy_client, &mut proxy_origin, b"").await });

        client_end.write_all(b"bye").await.unwrap();
        let mut buf = [0u8; 3];
        origin_end.read_exact(&mut buf).await.unwrap();
        drop(client_end);

        let stats = timeout(Duration::from_secs(2), relay_task)
            .await
            .expect("relay must end once the client is gone")
            .unwrap()
            .unwrap();
        assert_eq!(stats.to_upstream, 3);
        assert_eq!(stats.to_client, 0);

        // Origin side sees the tunnel close even though it never hung up.
        let mut rest = Vec::new();
        origin_end.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn relay_ends_when_origin_closes_and_client_stays_idle() {
        let (mut client_end, mut proxy_client) = duplex(1024);
        let (mut proxy_origin, origin_end) = duplex(1024);

        let relay_task =
            tokio::spawn(async move { relay(&mut proxy_client, &mut proxy_origin, b"").await });

        drop(origin_end);
        let stats = timeout(Duration::from_secs(2), relay_task)
            .await
            .expect("relay must end once the origin is gone")
            .unwrap()
            .unwrap();
        assert_eq!(stats, TunnelStats::default());

        let mut rest = Vec::new();
        client_end.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn open_answers_established_then_relays() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let (mut client_end, mut proxy_client) = duplex(1024);
        let tunnel = tokio::spawn(async move {
            open(&mut proxy_client, "127.0.0.1", port, b"", Duration::from_secs(2)).await
        });

        let mut head = vec![0u8; responses::CONNECTION_ESTABLISHED.len()];
        client_end.read_exact(&mut head).await.unwrap();
        assert_eq!(head, responses::CONNECTION_ESTABLISHED);

        client_end.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        client_end.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");

        drop(client_end);
        let stats = tunnel.await.unwrap().unwrap();
        assert_eq!(stats.to_upstream, 4);
        assert_eq!(stats.to_client, 4);
    }

    #[tokio::test]
    async fn unreachable_target_gets_502() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut client_end, mut proxy_client) = duplex(1024);
        let result = open(&mut proxy_client, "127.0.0.1", port, b"", Duration::from_secs(2)).await;
        assert!(result.is_err());
        drop(proxy_client);

        let mut reply = Vec::new();
        client_end.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
    }
}
