//! Splunk session management.
//!
//! # Module Structure
//! - `retry`: exponential backoff for transient failures
//! - `transport`: the [`SearchTransport`] seam and its request/response types
//! - `rest`: [`SearchTransport`] over the Splunk management REST API
//! - `manager`: session lifecycle, expiry and reconnect logic

pub mod manager;
pub mod rest;
pub mod retry;
pub mod transport;

use std::sync::Arc;

use tokio::sync::Mutex;

pub use manager::{ConnectionStatus, SessionConfig, SessionManager, SessionState, SessionStats};
pub use rest::RestTransport;
pub use retry::{RetryFailure, RetryPolicy, retry_with_backoff};
pub use transport::{
    ConnectionHandle, Record, SearchOutcome, SearchRequest, SearchStatistics, SearchTransport,
    ServerInfo, TransportError, normalize_query,
};

/// Session manager shared between concurrent tool calls.
pub type SharedSession<T> = Arc<Mutex<SessionManager<T>>>;

/// Wraps a manager for sharing.
pub fn shared<T: SearchTransport>(manager: SessionManager<T>) -> SharedSession<T> {
    Arc::new(Mutex::new(manager))
}
