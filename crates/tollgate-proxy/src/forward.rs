//! Forwarder: replays a request to its origin and streams the answer back.
//!
//! The request's raw bytes go upstream unchanged. The response head is read
//! until the blank line, checked against the request method, and then the
//! head and body are streamed to the client, and to a cache entry when the
//! caller supplies one. The body ends when the declared `Content-Length` is
//! satisfied or, without one, when the origin closes.
//!
//! If anything fails before the first byte reached the client, the client
//! gets a `502 Bad Gateway`. After that, a failure just ends the connection.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use tollgate_core::http::find_header_end;
use tollgate_core::{policy, ParseError, ParsedRequest, ParsedResponse, PolicyViolation};
use tollgate_storage::CacheWriter;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::responses;
use crate::upstream;

/// Largest response head accepted from an origin.
pub const MAX_RESPONSE_HEAD: usize = 64 * 1024;

const CHUNK_SIZE: usize = 16 * 1024;

/// What happened to a forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The response was streamed to the client.
    Relayed {
        status: u16,
        /// Bytes written to the client, head included.
        bytes: u64,
        /// Whether a cache entry was published.
        cached: bool,
    },
    /// The response had the wrong shape for the method; the client got an
    /// error status instead.
    Rejected(PolicyViolation),
}

/// Sends requests to origins on behalf of clients.
#[derive(Debug, Clone)]
pub struct Forwarder {
    forward_port: u16,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl Forwarder {
    pub fn new(forward_port: u16, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            forward_port,
            connect_timeout,
            idle_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.forward_port,
            config.connect_timeout(),
            config.upstream_idle_timeout(),
        )
    }

    /// Origin host and port for a Host header value. An explicit port wins
    /// over the configured forward port.
    pub fn origin(&self, host_header: &str) -> (String, u16) {
        upstream::split_authority(host_header, self.forward_port)
    }

    /// Connects to the request's origin and relays the exchange.
    pub async fn forward<C>(
        &self,
        request: &ParsedRequest,
        client: &mut C,
        cache: Option<CacheWriter>,
    ) -> Result<ForwardOutcome>
    where
        C: AsyncWrite + Unpin,
    {
        let host_header = request.host().ok_or(ProxyError::MissingHost)?;
        let (host, port) = self.origin(host_header);

        let mut origin = match upstream::connect(&host, port, self.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = responses::send_status(client, 502).await;
                return Err(e);
            }
        };
        self.relay(request, &mut origin, client, cache).await
    }

    /// Relays one exchange over an already open origin stream.
    pub async fn relay<U, C>(
        &self,
        request: &ParsedRequest,
        origin: &mut U,
        client: &mut C,
        cache: Option<CacheWriter>,
    ) -> Result<ForwardOutcome>
    where
        U: AsyncRead + AsyncWrite + Unpin,
        C: AsyncWrite + Unpin,
    {
        let mut client_touched = false;
        let result = self
            .relay_inner(request, origin, client, cache, &mut client_touched)
            .await;
        if result.is_err() && !client_touched {
            let _ = responses::send_status(client, 502).await;
        }
        result
    }

    async fn relay_inner<U, C>(
        &self,
        request: &ParsedRequest,
        origin: &mut U,
        client: &mut C,
        mut cache: Option<CacheWriter>,
        client_touched: &mut bool,
    ) -> Result<ForwardOutcome>
    where
        U: AsyncRead + AsyncWrite + Unpin,
        C: AsyncWrite + Unpin,
    {
        let label = request.host().unwrap_or("origin").to_string();

        origin.write_all(&request.raw).await?;
        origin.flush().await?;

        let head = self.read_head(origin, &label).await?;
        let response = ParsedResponse::parse(&head)?;

        if let Err(violation) = policy::check_response(&request.method, &response) {
            *client_touched = true;
            responses::send_status(client, violation.status()).await?;
            return Ok(ForwardOutcome::Rejected(violation));
        }

        // Bytes still owed by the origin; `None` means read until close.
        let mut remaining = if request.method == "HEAD" || response.is_bodiless_status() {
            Some(0)
        } else {
            response.headers.content_length()
        };

        let mut initial = response.body.as_slice();
        if let Some(len) = remaining {
            let take = initial.len().min(usize::try_from(len).unwrap_or(usize::MAX));
            initial = &initial[..take];
            remaining = Some(len - take as u64);
        }

        *client_touched = true;
        client.write_all(&response.raw_head).await?;
        client.write_all(initial).await?;
        if let Some(writer) = cache.as_mut() {
            writer.write(&response.raw_head).await?;
            writer.write(initial).await?;
        }
        let mut bytes = (response.raw_head.len() + initial.len()) as u64;

        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining != Some(0) {
            let want = match remaining {
                Some(left) => usize::try_from(left).unwrap_or(CHUNK_SIZE).min(CHUNK_SIZE),
                None => CHUNK_SIZE,
            };
            let n = self.read_idle(origin, &mut buf[..want], &label).await?;
            if n == 0 {
                break;
            }
            client.write_all(&buf[..n]).await?;
            if let Some(writer) = cache.as_mut() {
                writer.write(&buf[..n]).await?;
            }
            bytes += n as u64;
            if let Some(left) = remaining.as_mut() {
                *left -= n as u64;
            }
        }
        client.flush().await?;

        let complete = matches!(remaining, None | Some(0));
        let cached = match cache {
            Some(writer) if complete => match writer.commit().await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Failed to publish cache entry for {}: {}", label, e);
                    false
                }
            },
            Some(writer) => {
                debug!(
                    "{} closed {} bytes early, discarding cache entry {}",
                    label,
                    remaining.unwrap_or_default(),
                    writer.key()
                );
                false
            }
            None => false,
        };

        Ok(ForwardOutcome::Relayed {
            status: response.status,
            bytes,
            cached,
        })
    }

    async fn read_head<U>(&self, origin: &mut U, label: &str) -> Result<Vec<u8>>
    where
        U: AsyncRead + Unpin,
    {
        let mut head = Vec::with_capacity(4096);
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read_idle(origin, &mut buf, label).await?;
            if n == 0 {
                return Err(ProxyError::UpstreamClosed(label.to_string()));
            }
            head.extend_from_slice(&buf[..n]);
            if find_header_end(&head).is_some() {
                return Ok(head);
            }
            if head.len() > MAX_RESPONSE_HEAD {
                return Err(ParseError::MissingTerminator.into());
            }
        }
    }

    async fn read_idle<U>(&self, origin: &mut U, buf: &mut [u8], label: &str) -> Result<usize>
    where
        U: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.idle_timeout, origin.read(buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(ProxyError::UpstreamTimeout(label.to_string())),
        }
    }
}
