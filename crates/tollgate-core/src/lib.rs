//! Tollgate Core - protocol and policy building blocks for the proxy.
//!
//! This crate holds the pieces of the proxy that do no network I/O:
//!
//! - [`http`]: raw HTTP/1.x request and response head codec
//! - [`policy`]: method whitelist and body-shape rules
//! - [`session`]: per-address token login gate
//! - [`filter`]: substring domain blocklist with file persistence
//!
//! ## Request path
//!
//! ```text
//! raw bytes → ParsedRequest → SessionGate → DomainFilter → policy → forward / tunnel
//! ```

pub mod filter;
pub mod http;
pub mod policy;
pub mod session;

pub use filter::{DomainFilter, FilterError};
pub use http::{Headers, ParseError, ParsedRequest, ParsedResponse};
pub use policy::PolicyViolation;
pub use session::{AccessTokens, GateDecision, Session, SessionGate};
