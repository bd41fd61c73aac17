//! Proxy server: listener, accept loop and per-connection dispatch.
//!
//! Each accepted connection carries exactly one request. The handler reads
//! it, runs it through the login gate, the domain filter and the method
//! rules, and then either tunnels (CONNECT), answers from the cache, or
//! forwards to the origin. Errors end that connection only.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tollgate_core::http::find_header_end;
use tollgate_core::{policy, DomainFilter, GateDecision, ParseError, ParsedRequest, SessionGate};
use tollgate_storage::{CacheKey, CacheStore, EventLog};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::forward::{ForwardOutcome, Forwarder};
use crate::responses;
use crate::tunnel;

/// Backlog passed to `listen`.
const LISTEN_BACKLOG: i32 = 128;

const READ_CHUNK: usize = 4096;

/// State shared by every connection handler.
///
/// Sessions, the filter list and the cache outlive individual listeners, so
/// a stopped and restarted proxy keeps its logins and blocklist.
pub struct ProxyContext {
    config: ProxyConfig,
    gate: SessionGate,
    filter: DomainFilter,
    cache: CacheStore,
    events: EventLog,
    forwarder: Forwarder,
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("listen_addr", &self.config.listen_addr)
            .field("sessions", &self.gate.session_count())
            .field("filter_entries", &self.filter.list().len())
            .field("cache_dir", &self.cache.dir())
            .finish()
    }
}

impl ProxyContext {
    /// Loads the filter list and opens the cache and event log named by
    /// `config`.
    pub fn open(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let filter = DomainFilter::load(&config.filter_file)?;
        let cache = CacheStore::open(&config.cache_dir)?;
        let events = EventLog::open(&config.log_file)?;
        Ok(Self {
            gate: SessionGate::new(config.tokens.clone()),
            forwarder: Forwarder::from_config(&config),
            config,
            filter,
            cache,
            events,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn filter(&self) -> &DomainFilter {
        &self.filter
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}

/// Handle to a running listener.
///
/// Dropping the handle also stops the accept loop.
pub struct ProxyHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    /// The bound address (with the real port when 0 was requested).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting. Connections already being handled run to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for the accept loop to exit.
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    /// Shuts down and waits for the accept loop to exit.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

/// Creates a listening socket with address reuse enabled.
pub fn bind(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let bind_err = |source| ProxyError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    Ok(socket.into())
}

/// Binds the configured address and spawns the accept loop.
///
/// Must be called from within a Tokio runtime.
pub fn start(ctx: Arc<ProxyContext>) -> Result<ProxyHandle> {
    let requested = ctx.config.listen_addr;
    let listener = TcpListener::from_std(bind(requested)?).map_err(|source| ProxyError::Bind {
        addr: requested.to_string(),
        source,
    })?;
    let addr = listener.local_addr().map_err(|source| ProxyError::Bind {
        addr: requested.to_string(),
        source,
    })?;

    let limiter = match ctx.config.max_connections {
        0 => None,
        max => Some(Arc::new(Semaphore::new(max))),
    };

    info!("Proxy listening on {}", addr);
    ctx.events.record(format!("Listening on {addr}"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(listener, ctx, limiter, shutdown_rx));

    Ok(ProxyHandle {
        addr,
        shutdown_tx,
        task,
    })
}

/// Accept loop: runs until shutdown is signalled or the handle is dropped.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    limiter: Option<Arc<Semaphore>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Excess clients wait in the listen backlog.
        let permit = match &limiter {
            Some(limiter) => tokio::select! {
                permit = Arc::clone(limiter).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                _ = shutdown_rx.changed() => break,
            },
            None => None,
        };

        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, peer, &ctx).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    info!("Proxy server shutting down");
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ProxyContext) {
    ctx.events
        .record(format!("Accepted connection from {}", peer));
    if let Err(e) = serve_connection(&mut stream, peer.ip(), ctx).await {
        debug!("Connection handler error for {}: {}", peer, e);
        ctx.events
            .record(format!("Error handling client {}: {}", peer.ip(), e));
    }
}

/// Handles the single request carried by `stream`.
pub async fn serve_connection<S>(stream: &mut S, peer: IpAddr, ctx: &ProxyContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request(stream, &ctx.config).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) => {
            if let Some(status) = e.client_status() {
                let _ = responses::send_status(stream, status).await;
            }
            return Err(e);
        }
    };
    let events = &ctx.events;

    let filter_enabled = match ctx.gate.check(peer, &request) {
        GateDecision::Proceed { filter_enabled } => filter_enabled,
        GateDecision::Authenticated { filter_enabled } => {
            let mode = if filter_enabled { "with" } else { "without" };
            events.record(format!("Client {peer} authenticated {mode} filtering."));
            responses::send(stream, responses::see_other(&request.target).as_bytes()).await?;
            return Ok(());
        }
        GateDecision::LoginRequired => {
            events.record(format!("Login page sent to {peer}."));
            responses::send(stream, responses::login_page().as_bytes()).await?;
            return Ok(());
        }
        GateDecision::InvalidToken => {
            events.record(format!("Client {peer} provided an invalid token."));
            responses::send(stream, responses::login_page().as_bytes()).await?;
            return Ok(());
        }
    };

    if request.is_connect() {
        let (host, port) = tunnel::connect_target(&request);
        if filter_enabled && ctx.filter.blocks(&host) {
            events.record(format!("Blocked HTTPS request to {host} from {peer}"));
            responses::send_status(stream, 401).await?;
            return Ok(());
        }
        events.record(format!("Handling HTTPS tunnel for {host}:{port} from {peer}"));
        let early_data = request.body.as_deref().unwrap_or_default();
        tunnel::open(stream, &host, port, early_data, ctx.config.connect_timeout()).await?;
        return Ok(());
    }

    let host = request.host();
    if let Some(host) = host.filter(|host| filter_enabled && ctx.filter.blocks(host)) {
        events.record(format!("Blocked request to {host} from {peer}"));
        responses::send_status(stream, 401).await?;
        return Ok(());
    }

    if let Err(violation) = policy::check_request(&request) {
        events.record(format!(
            "Rejected request to {} from {}: {}",
            host.unwrap_or("-"),
            peer,
            violation
        ));
        responses::send_status(stream, violation.status()).await?;
        return Ok(());
    }

    let Some(host) = host else {
        responses::send_status(stream, 400).await?;
        return Err(ProxyError::MissingHost);
    };

    let mut cache_writer = None;
    if policy::is_cacheable(&request.method) {
        let key = CacheKey::for_request(&request.raw);
        if let Some(bytes) = ctx.cache.serve(&key, stream).await? {
            events.record(format!(
                "Cache hit for {host} - served {bytes} bytes to {peer}"
            ));
            return Ok(());
        }
        cache_writer = match ctx.cache.begin(&key).await {
            Ok(writer) => writer,
            Err(e) => {
                warn!("Cannot cache response for {}: {}", host, e);
                None
            }
        };
    }

    match ctx.forwarder.forward(&request, stream, cache_writer).await? {
        ForwardOutcome::Relayed {
            status,
            bytes,
            cached,
        } => {
            let cached = if cached { ", cached" } else { "" };
            events.record(format!(
                "Forwarded {} {} for {}: {} ({} bytes{})",
                request.method, host, peer, status, bytes, cached
            ));
        }
        ForwardOutcome::Rejected(violation) => {
            events.record(format!(
                "Rejected response from {host} for {peer}: {violation}"
            ));
        }
    }
    Ok(())
}

/// Reads one request within the configured header timeout.
///
/// Returns `Ok(None)` when the peer closes without sending anything. When
/// the head declares a `Content-Length`, reading continues until that many
/// body bytes arrived or the peer stops sending.
pub async fn read_request<S>(stream: &mut S, config: &ProxyConfig) -> Result<Option<ParsedRequest>>
where
    S: AsyncRead + Unpin,
{
    let read = read_request_bytes(stream, config.max_header_bytes, config.max_body_bytes);
    match tokio::time::timeout(config.header_read_timeout(), read).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::ReadTimeout),
    }
}

async fn read_request_bytes<S>(
    stream: &mut S,
    max_header_bytes: usize,
    max_body_bytes: u64,
) -> Result<Option<ParsedRequest>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ParseError::MissingTerminator.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        if buf.len() > max_header_bytes {
            return Err(ProxyError::HeaderTooLarge(max_header_bytes));
        }
    };
    if head_end > max_header_bytes {
        return Err(ProxyError::HeaderTooLarge(max_header_bytes));
    }

    let request = ParsedRequest::parse(&buf)?;
    let declared = match request.headers.content_length() {
        Some(len) if !request.is_connect() => len,
        _ => return Ok(Some(request)),
    };
    if declared > max_body_bytes {
        return Err(ProxyError::BodyTooLarge(declared));
    }

    let wanted = head_end + declared as usize;
    if buf.len() >= wanted {
        return Ok(Some(request));
    }
    while buf.len() < wanted {
        let limit = (wanted - buf.len()).min(READ_CHUNK);
        let n = stream.read(&mut chunk[..limit]).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(Some(ParsedRequest::parse(&buf)?))
}
