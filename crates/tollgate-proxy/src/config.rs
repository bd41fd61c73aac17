//! Proxy configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes:
//!
//! ```json
//! { "listen_addr": "127.0.0.1:3128", "tokens": { "filtered": "kids-only" } }
//! ```

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use tollgate_core::AccessTokens;

use crate::error::{ProxyError, Result};

/// Default listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default origin port for plain HTTP.
pub const DEFAULT_FORWARD_PORT: u16 = 80;

/// Configuration for the proxy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Origin port used when the Host header names none.
    pub forward_port: u16,
    /// Directory holding cached responses.
    pub cache_dir: PathBuf,
    /// Blocklist file, one substring per line.
    pub filter_file: PathBuf,
    /// Event log file.
    pub log_file: PathBuf,
    /// Directory reports are written to.
    pub report_dir: PathBuf,
    /// Login secrets.
    pub tokens: AccessTokens,
    /// Time allowed for a client to send its request.
    pub header_read_timeout_secs: u64,
    /// Time allowed for an upstream TCP connect.
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated from an origin mid-response.
    pub upstream_idle_timeout_secs: u64,
    /// Concurrent connection limit (0 = unlimited).
    pub max_connections: usize,
    /// Largest accepted request head.
    pub max_header_bytes: usize,
    /// Largest accepted declared request body.
    pub max_body_bytes: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
            forward_port: DEFAULT_FORWARD_PORT,
            cache_dir: PathBuf::from("cache"),
            filter_file: PathBuf::from("filtered_domains.txt"),
            log_file: PathBuf::from("proxy_log.txt"),
            report_dir: PathBuf::from("."),
            tokens: AccessTokens::default(),
            header_read_timeout_secs: 5,
            connect_timeout_secs: 10,
            upstream_idle_timeout_secs: 30,
            max_connections: 256,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ProxyConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform data directory, e.g. `~/.local/share/tollgate` on Linux.
    pub fn default_data_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "tollgate", "Tollgate").map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Places the cache, filter list, log and reports under `dir`.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.cache_dir = dir.join("cache");
        self.filter_file = dir.join("filtered_domains.txt");
        self.log_file = dir.join("proxy_log.txt");
        self.report_dir = dir.join("reports");
        self
    }

    /// Sets the listen address.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Sets the origin port for plain HTTP.
    pub fn with_forward_port(mut self, port: u16) -> Self {
        self.forward_port = port;
        self
    }

    /// Sets the login secrets.
    pub fn with_tokens(mut self, tokens: AccessTokens) -> Self {
        self.tokens = tokens;
        self
    }

    /// Sets the concurrent connection limit.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn upstream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_idle_timeout_secs)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.forward_port == 0 {
            return Err(ProxyError::Config("forward_port must be non-zero".into()));
        }
        if self.tokens.unfiltered.is_empty() || self.tokens.filtered.is_empty() {
            return Err(ProxyError::Config("login tokens must not be empty".into()));
        }
        if self.tokens.unfiltered == self.tokens.filtered {
            return Err(ProxyError::Config("login tokens must differ".into()));
        }
        if self.header_read_timeout_secs == 0
            || self.connect_timeout_secs == 0
            || self.upstream_idle_timeout_secs == 0
        {
            return Err(ProxyError::Config("timeouts must be at least one second".into()));
        }
        if self.max_header_bytes < 1024 {
            return Err(ProxyError::Config("max_header_bytes must be at least 1024".into()));
        }
        Ok(())
    }
}
