//! Method and body-shape policy for proxied traffic.
//!
//! Requests are checked before any upstream I/O; responses are checked once
//! the origin's head has been read and before anything is relayed.

use thiserror::Error;

use crate::http::{ParsedRequest, ParsedResponse};

/// Methods forwarded to an origin. CONNECT is handled separately.
pub const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "OPTIONS"];

/// Methods whose requests must carry a body.
pub const BODY_REQUIRED_METHODS: &[&str] = &["POST"];

/// Methods whose successful responses must carry a body.
pub const RESPONSE_BODY_REQUIRED_METHODS: &[&str] = &["GET", "POST"];

/// Methods whose successful responses must not carry a body.
pub const RESPONSE_BODY_FORBIDDEN_METHODS: &[&str] = &["HEAD", "OPTIONS"];

/// Methods whose responses may be cached.
pub const CACHEABLE_METHODS: &[&str] = &["GET", "HEAD"];

/// A policy check that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),

    #[error("{0} request without a body")]
    MissingBody(String),

    #[error("{0} request with a body")]
    UnexpectedBody(String),

    #[error("successful response to {0} carries a body")]
    UnexpectedResponseBody(String),

    #[error("successful response to {0} carries no body")]
    MissingResponseBody(String),
}

impl PolicyViolation {
    /// HTTP status sent to the client for this violation.
    pub fn status(&self) -> u16 {
        match self {
            PolicyViolation::MethodNotAllowed(_) => 405,
            _ => 400,
        }
    }
}

/// Checks the method whitelist and the request body rules.
pub fn check_request(request: &ParsedRequest) -> Result<(), PolicyViolation> {
    let method = request.method.as_str();
    if !ALLOWED_METHODS.contains(&method) {
        return Err(PolicyViolation::MethodNotAllowed(request.method.clone()));
    }

    let body_required = BODY_REQUIRED_METHODS.contains(&method);
    match (body_required, request.has_body()) {
        (true, false) => Err(PolicyViolation::MissingBody(request.method.clone())),
        (false, true) => Err(PolicyViolation::UnexpectedBody(request.method.clone())),
        _ => Ok(()),
    }
}

/// Checks a response head against the method that produced it.
///
/// Only successful responses are constrained.
pub fn check_response(method: &str, response: &ParsedResponse) -> Result<(), PolicyViolation> {
    if !response.is_success() {
        return Ok(());
    }

    let has_body = response.carries_body(method);
    if RESPONSE_BODY_FORBIDDEN_METHODS.contains(&method) && has_body {
        return Err(PolicyViolation::UnexpectedResponseBody(method.to_string()));
    }
    if RESPONSE_BODY_REQUIRED_METHODS.contains(&method) && !has_body {
        return Err(PolicyViolation::MissingResponseBody(method.to_string()));
    }
    Ok(())
}

/// Returns true if responses to this method go through the cache.
pub fn is_cacheable(method: &str) -> bool {
    CACHEABLE_METHODS.contains(&method)
}
