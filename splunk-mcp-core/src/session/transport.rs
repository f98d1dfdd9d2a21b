//! Transport abstraction between the session manager and Splunk.
//!
//! The session manager only sees this trait, so lifecycle logic is tested
//! against scripted transports and production uses [`super::RestTransport`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::security::Credentials;

/// One search result row.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Authenticated session token returned by [`SearchTransport::authenticate`].
///
/// The token is zeroed on drop and never printed.
#[derive(Clone)]
pub struct ConnectionHandle {
    session_key: Zeroizing<String>,
}

impl ConnectionHandle {
    /// Wraps a session key returned by the server.
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: Zeroizing::new(session_key.into()),
        }
    }

    /// Token for the `Authorization` header.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("session_key", &"****")
            .finish()
    }
}

/// Server identity reported by a health probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// `serverName` of the instance that answered
    pub server_name: String,
    /// Splunk version, e.g. `9.2.1`
    pub version: String,
    /// Build hash
    pub build: String,
}

/// A search to run.
///
/// Transports return at most `max_results + 1` records so callers can tell a
/// clipped result set from one that fit exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    /// Normalized SPL, see [`normalize_query`]
    pub query: String,
    /// Start of the time range, Splunk time syntax
    pub earliest_time: String,
    /// End of the time range, Splunk time syntax
    pub latest_time: String,
    /// Records the caller wants at most
    pub max_results: usize,
    /// Server-side execution limit
    #[serde(skip)]
    pub max_execution_time: Duration,
}

impl SearchRequest {
    /// Builds a request, normalizing the query text.
    pub fn new(
        query: &str,
        earliest_time: impl Into<String>,
        latest_time: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            query: normalize_query(query),
            earliest_time: earliest_time.into(),
            latest_time: latest_time.into(),
            max_results,
            max_execution_time: Duration::from_secs(300),
        }
    }

    /// Builder method to set the server-side execution limit.
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = limit;
        self
    }

    /// Number of rows to ask the server for.
    pub fn fetch_count(&self) -> usize {
        self.max_results.saturating_add(1)
    }
}

/// Job counters reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStatistics {
    /// Events matched
    pub event_count: u64,
    /// Events scanned
    pub scan_count: u64,
    /// Rows produced
    pub result_count: u64,
    /// Seconds
    pub run_duration: f64,
}

/// Raw output of a completed search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Result rows, at most [`SearchRequest::fetch_count`]
    pub records: Vec<Record>,
    /// Job counters
    pub statistics: SearchStatistics,
    /// Informational or warning messages attached to the job
    pub messages: Vec<String>,
}

/// Transport-level failure, classified for the retry logic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, TCP or TLS failure before a response arrived
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// No response within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The server rejected the credentials or the session key
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// First server message, or the status reason
        message: String,
    },

    /// The search job ran but the server reported it as failed
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// The server answered with something that could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether the same request may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized(_) | Self::SearchFailed(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Operations the session manager needs from a Splunk deployment.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Exchanges credentials for a session token.
    async fn authenticate(&self, credentials: &Credentials)
    -> Result<ConnectionHandle, TransportError>;

    /// Cheap authenticated request used for health checks.
    async fn probe(&self, handle: &ConnectionHandle) -> Result<ServerInfo, TransportError>;

    /// Runs a search to completion and returns its rows.
    async fn search(
        &self,
        handle: &ConnectionHandle,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, TransportError>;

    /// Names of the indexes visible to the session.
    async fn list_indexes(&self, handle: &ConnectionHandle) -> Result<Vec<String>, TransportError>;

    /// Invalidates the session token on the server.
    async fn logout(&self, _handle: &ConnectionHandle) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Prefixes `search ` unless the query already starts with `search` or a
/// generating command (`|`).
pub fn normalize_query(query: &str) -> String {
    let trimmed = query.trim();
    let starts_with_search = trimmed
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("search"));
    if starts_with_search || trimmed.starts_with('|') {
        trimmed.to_string()
    } else {
        format!("search {}", trimmed)
    }
}
