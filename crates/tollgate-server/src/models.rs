//! API request and response models.

use serde::{Deserialize, Serialize};

/// Response body for the proxy lifecycle endpoints.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Whether the proxy is accepting connections.
    pub running: bool,
    /// Bound address while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    /// Number of logged-in client addresses.
    pub sessions: usize,
    /// Number of filter entries.
    pub filter_entries: usize,
}

/// One logged-in client in GET /api/sessions.
#[derive(Debug, Serialize)]
pub struct SessionEntry {
    pub ip: String,
    pub filter_enabled: bool,
    /// RFC 3339 login time (UTC).
    pub authenticated_at: String,
}

/// Response body for GET /api/sessions.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionEntry>,
}

/// Response body for GET /api/hosts.
#[derive(Debug, Serialize)]
pub struct HostsResponse {
    pub hosts: Vec<String>,
}

/// Request body for POST /api/hosts.
#[derive(Debug, Deserialize)]
pub struct AddHostRequest {
    /// Substring to block.
    pub host: String,
}

/// Response body for host mutations.
#[derive(Debug, Serialize)]
pub struct HostChangeResponse {
    pub host: String,
    /// False when the request was a no-op.
    pub changed: bool,
    pub hosts: Vec<String>,
}

/// Request body for POST /api/reports.
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    /// Client address to select log lines for.
    pub ip: String,
}

/// Response body for POST /api/reports.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub ip: String,
    /// Path of the written report.
    pub path: String,
}

/// Response body for GET /api/about.
#[derive(Debug, Serialize)]
pub struct AboutResponse {
    pub about: String,
    pub version: String,
}
