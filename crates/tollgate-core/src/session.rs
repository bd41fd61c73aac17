//! Per-peer login gate.
//!
//! Every client address has to submit one of two shared secrets before any
//! traffic is proxied for it. The secret that was used decides whether the
//! domain filter applies to that address. Sessions never expire; they live
//! as long as the [`SessionGate`] that created them.
//!
//! ```
//! use std::net::IpAddr;
//! use tollgate_core::http::ParsedRequest;
//! use tollgate_core::session::{AccessTokens, GateDecision, SessionGate};
//!
//! let gate = SessionGate::new(AccessTokens::default());
//! let peer: IpAddr = "10.0.0.5".parse().unwrap();
//!
//! let browse = ParsedRequest::parse(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
//! assert_eq!(gate.check(peer, &browse), GateDecision::LoginRequired);
//!
//! let login = ParsedRequest::parse(b"POST / HTTP/1.1\r\n\r\ntoken=51e2cba401").unwrap();
//! assert_eq!(gate.check(peer, &login), GateDecision::Authenticated { filter_enabled: true });
//! assert_eq!(gate.check(peer, &browse), GateDecision::Proceed { filter_enabled: true });
//! ```

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::http::ParsedRequest;

/// Form field carrying the secret.
pub const TOKEN_FIELD: &str = "token";

/// Secret that admits a client without domain filtering.
pub const DEFAULT_UNFILTERED_TOKEN: &str = "8a21bce200";

/// Secret that admits a client with domain filtering enabled.
pub const DEFAULT_FILTERED_TOKEN: &str = "51e2cba401";

/// Login form served to clients without a session.
pub const LOGIN_PAGE_HTML: &str = r#"<html>
<body>
<h2>Login</h2>
<form method="POST" action="/">
  Token: <input type="text" name="token">
  <input type="submit" value="Submit">
</form>
</body>
</html>
"#;

/// The two shared secrets accepted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokens {
    /// Admits a client with filtering disabled.
    #[serde(default = "default_unfiltered")]
    pub unfiltered: String,
    /// Admits a client with filtering enabled.
    #[serde(default = "default_filtered")]
    pub filtered: String,
}

fn default_unfiltered() -> String {
    DEFAULT_UNFILTERED_TOKEN.to_string()
}

fn default_filtered() -> String {
    DEFAULT_FILTERED_TOKEN.to_string()
}

impl Default for AccessTokens {
    fn default() -> Self {
        Self {
            unfiltered: default_unfiltered(),
            filtered: default_filtered(),
        }
    }
}

impl AccessTokens {
    /// Maps a submitted secret to the filter setting it grants.
    pub fn resolve(&self, token: &str) -> Option<bool> {
        if token == self.unfiltered {
            Some(false)
        } else if token == self.filtered {
            Some(true)
        } else {
            None
        }
    }
}

/// State kept for an authenticated client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Whether the domain filter applies to this client.
    pub filter_enabled: bool,
    /// When the client logged in.
    pub authenticated_at: DateTime<Utc>,
}

/// Outcome of running a request through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The client already has a session; the request goes on.
    Proceed { filter_enabled: bool },
    /// This request created the session.
    Authenticated { filter_enabled: bool },
    /// No session and no login attempt: serve the login page.
    LoginRequired,
    /// A login attempt with an unknown or missing secret.
    InvalidToken,
}

impl GateDecision {
    /// Returns true if the login page should be served.
    pub fn needs_login_page(&self) -> bool {
        matches!(self, GateDecision::LoginRequired | GateDecision::InvalidToken)
    }
}

/// Registry of authenticated client addresses.
#[derive(Debug, Default)]
pub struct SessionGate {
    tokens: AccessTokens,
    sessions: RwLock<HashMap<IpAddr, Session>>,
}

impl SessionGate {
    /// Creates a gate accepting the given secrets.
    pub fn new(tokens: AccessTokens) -> Self {
        Self {
            tokens,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Runs a freshly parsed request from `peer` through the gate.
    pub fn check(&self, peer: IpAddr, request: &ParsedRequest) -> GateDecision {
        if let Some(session) = self.session(peer) {
            return GateDecision::Proceed {
                filter_enabled: session.filter_enabled,
            };
        }

        if request.method != "POST" {
            return GateDecision::LoginRequired;
        }

        let granted = request
            .form_field(TOKEN_FIELD)
            .and_then(|token| self.tokens.resolve(&token));

        match granted {
            Some(filter_enabled) => {
                let mut sessions = self.sessions.write();
                // A concurrent login from the same address may have won the race.
                let session = sessions.entry(peer).or_insert_with(|| Session {
                    filter_enabled,
                    authenticated_at: Utc::now(),
                });
                GateDecision::Authenticated {
                    filter_enabled: session.filter_enabled,
                }
            }
            None => GateDecision::InvalidToken,
        }
    }

    /// Returns the session for an address, if any.
    pub fn session(&self, peer: IpAddr) -> Option<Session> {
        self.sessions.read().get(&peer).copied()
    }

    /// Number of authenticated addresses.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Every session, oldest login first.
    pub fn sessions(&self) -> Vec<(IpAddr, Session)> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .iter()
            .map(|(peer, session)| (*peer, *session))
            .collect();
        sessions.sort_by_key(|(peer, session)| (session.authenticated_at, *peer));
        sessions
    }
}
