//! Tollgate Proxy - forward HTTP/HTTPS proxy engine.
//!
//! Clients point their browser at the proxy and must log in once per
//! address with one of two tokens. The token decides whether the domain
//! filter applies to that client. Plain HTTP is forwarded to the origin and
//! GET/HEAD responses are cached on disk keyed by the exact request bytes;
//! HTTPS is tunnelled via CONNECT without being decrypted.
//!
//! ## Architecture
//!
//! ```text
//! accept → read request → SessionGate ─┬─ no session → login page / 303
//!                                      │
//!                                      ▼
//!                              CONNECT? ──yes──→ DomainFilter → tunnel
//!                                      │ no
//!                                      ▼
//!                    DomainFilter → method rules → cache hit? ──yes──→ serve
//!                                                      │ no
//!                                                      ▼
//!                                                  Forwarder (write-through cache)
//! ```
//!
//! [`ProxyController`] is the entry point for front ends.

mod controller;
mod error;
pub mod config;
pub mod forward;
pub mod responses;
pub mod server;
pub mod tunnel;
pub mod upstream;

pub use config::{ProxyConfig, DEFAULT_FORWARD_PORT, DEFAULT_LISTEN_PORT};
pub use controller::{about, ProxyController};
pub use error::{ProxyError, Result};
pub use forward::{ForwardOutcome, Forwarder};
pub use server::{ProxyContext, ProxyHandle};
pub use tunnel::TunnelStats;
