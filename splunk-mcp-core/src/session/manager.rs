//! Session lifecycle: authenticate once, reuse the session until it ages out,
//! and recover from transport failures with bounded retries.
//!
//! ```text
//! Disconnected -> Authenticating -> Connected -> Stale -> Authenticating ...
//!                       |                                     |
//!                       +---- retries exhausted / 401 --------+--> Disconnected
//! ```
//!
//! Expiry is checked at the top of every session-using call; there is no
//! background timer. Connect attempts and whole-call execute retries are
//! separate budgets.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::retry::{RetryPolicy, retry_with_backoff};
use super::transport::{
    ConnectionHandle, SearchOutcome, SearchRequest, SearchTransport, ServerInfo, TransportError,
};
use crate::Result;
use crate::config::SessionSettings;
use crate::error::SplunkMcpError;
use crate::security::{CredentialSource, Credentials};

/// Maximum number of index names reported by a health check.
const STATUS_INDEX_LIMIT: usize = 10;

/// Lifecycle state of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session; the next call authenticates
    Disconnected,
    /// Login in progress, including backoff between attempts
    Authenticating,
    /// Session key held and younger than the TTL
    Connected,
    /// Session exists but must be replaced before the next use
    Stale,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Stale => "stale",
        };
        f.write_str(label)
    }
}

/// Timing and retry configuration of a [`SessionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// How long a session is reused before re-authenticating
    pub ttl: Duration,
    /// Connect attempts and backoff schedule
    pub connect_policy: RetryPolicy,
    /// Whole-call retries after a transport failure during use
    pub execute_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl SessionConfig {
    /// Builds the session timing from the `session` configuration section.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            connect_policy: RetryPolicy::from_settings(settings),
            execute_retries: settings.execute_retries,
        }
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Authentication requests sent, including failed ones
    pub connect_attempts: u64,
    /// Sessions successfully established
    pub sessions_opened: u64,
    /// Sessions established to replace a stale one
    pub reconnects: u64,
}

/// Result of a health check. Never an error.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Whether the probe succeeded
    pub ok: bool,
    /// Time to connect (if needed) and probe, in milliseconds
    pub latency_ms: u64,
    /// Server identity, present when `ok`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// First few visible indexes; empty when listing failed
    pub indexes: Vec<String>,
    /// Sanitized failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// [`SplunkMcpError::kind`] of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

#[derive(Debug)]
struct Session {
    handle: ConnectionHandle,
    created_at: Instant,
}

/// Owns the single authenticated session of the process.
pub struct SessionManager<T: SearchTransport> {
    transport: T,
    credential_source: CredentialSource,
    credentials: Option<Credentials>,
    config: SessionConfig,
    state: SessionState,
    session: Option<Session>,
    stats: SessionStats,
}

impl<T: SearchTransport> std::fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("username", &self.credential_source.username())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: SearchTransport> SessionManager<T> {
    /// Creates a disconnected manager. Nothing is decrypted or sent yet.
    pub fn new(transport: T, credential_source: CredentialSource, config: SessionConfig) -> Self {
        Self {
            transport,
            credential_source,
            credentials: None,
            config,
            state: SessionState::Disconnected,
            session: None,
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connection counters since the manager was created.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Timing and retry configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Time since the current session was established.
    pub fn session_age(&self) -> Option<Duration> {
        self.session.as_ref().map(|s| s.created_at.elapsed())
    }

    /// Decrypts the configured credentials now instead of on first connect.
    ///
    /// The plaintext stays inside the manager.
    ///
    /// # Errors
    /// Returns the vault error (`WrongMachine`, `CorruptCredential`, ...).
    pub fn decrypt_startup_credentials(&mut self) -> Result<()> {
        let credentials = self.resolve_credentials()?;
        tracing::info!(
            username = credentials.username(),
            sealed = self.credential_source.is_encrypted(),
            "Splunk credentials ready"
        );
        Ok(())
    }

    fn resolve_credentials(&mut self) -> Result<Credentials> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials.clone());
        }
        let credentials = self.credential_source.resolve()?;
        self.credentials = Some(credentials.clone());
        Ok(credentials)
    }

    fn mark_stale(&mut self) {
        if self.session.is_some() {
            self.state = SessionState::Stale;
        }
    }

    fn is_expired(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.created_at.elapsed() > self.config.ttl)
    }

    /// Returns a live session handle, connecting or reconnecting as needed.
    ///
    /// # Errors
    /// - credential errors from the vault, unchanged and never retried
    /// - [`SplunkMcpError::Authentication`] when the server rejects the login
    /// - [`SplunkMcpError::Connection`] once the connect budget is spent
    pub async fn ensure_connected(&mut self) -> Result<ConnectionHandle> {
        if self.is_expired() {
            tracing::info!(ttl = ?self.config.ttl, "Splunk session expired, reconnecting");
            self.mark_stale();
        }
        if self.state == SessionState::Connected
            && let Some(session) = &self.session
        {
            return Ok(session.handle.clone());
        }
        self.connect().await
    }

    /// Forces a fresh session, discarding the current one.
    ///
    /// # Errors
    /// Same as [`SessionManager::ensure_connected`].
    pub async fn authenticate(&mut self) -> Result<()> {
        self.mark_stale();
        self.connect().await.map(|_| ())
    }

    async fn connect(&mut self) -> Result<ConnectionHandle> {
        let replacing = self.state == SessionState::Stale;
        self.state = SessionState::Authenticating;
        if let Some(previous) = self.session.take() {
            match self.transport.logout(&previous.handle).await {
                Ok(()) => tracing::debug!("Logged out replaced Splunk session"),
                Err(e) => tracing::debug!(error = %e, "Could not log out replaced Splunk session"),
            }
        }

        let credentials = match self.resolve_credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        let policy = self.config.connect_policy.clone();
        let transport = &self.transport;
        let credentials = &credentials;
        let max_attempts = policy.max_attempts.max(1);
        let outcome = retry_with_backoff(
            &policy,
            |attempt| {
                tracing::info!(attempt, max_attempts, "Connecting to Splunk");
                transport.authenticate(credentials)
            },
            TransportError::is_transient,
        )
        .await;

        match outcome {
            Ok((handle, attempts)) => {
                self.stats.connect_attempts += u64::from(attempts);
                self.stats.sessions_opened += 1;
                if replacing {
                    self.stats.reconnects += 1;
                }
                self.session = Some(Session {
                    handle: handle.clone(),
                    created_at: Instant::now(),
                });
                self.state = SessionState::Connected;
                tracing::info!(attempts, "Connected to Splunk");
                Ok(handle)
            }
            Err(failure) => {
                self.stats.connect_attempts += u64::from(failure.attempts);
                self.state = SessionState::Disconnected;
                tracing::error!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Failed to connect to Splunk"
                );
                Err(match failure.error {
                    TransportError::Unauthorized(_) => {
                        SplunkMcpError::authentication("Invalid credentials")
                    }
                    other => SplunkMcpError::Connection {
                        attempts: failure.attempts,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Decides whether a failed call gets another try on a fresh session.
    ///
    /// Returns `None` to retry, or the error to surface.
    fn recover(
        &mut self,
        error: TransportError,
        retries_left: &mut u32,
        calls: u32,
    ) -> Option<SplunkMcpError> {
        // A rejected session key means the server expired the session
        let (classified, rejection) = match error {
            TransportError::Unauthorized(message) => (SplunkMcpError::SessionExpired, Some(message)),
            e if e.is_transient() => (
                SplunkMcpError::Connection {
                    attempts: calls,
                    reason: e.to_string(),
                },
                None,
            ),
            e => (SplunkMcpError::query_failed(e.to_string()), None),
        };
        if classified.is_retryable() {
            self.mark_stale();
            if *retries_left > 0 {
                *retries_left -= 1;
                tracing::warn!(
                    kind = classified.kind(),
                    error = %classified,
                    "Session call failed, reconnecting and retrying"
                );
                return None;
            }
        }
        Some(match rejection {
            Some(message) => SplunkMcpError::authentication(format!(
                "Session rejected after reconnect: {}",
                message
            )),
            None => classified,
        })
    }

    /// Runs a search on the managed session.
    ///
    /// # Errors
    /// Connection errors from [`SessionManager::ensure_connected`], or the
    /// second failure of the search itself.
    pub async fn execute(&mut self, request: &SearchRequest) -> Result<SearchOutcome> {
        let mut retries_left = self.config.execute_retries;
        let mut calls = 0u32;
        loop {
            let handle = self.ensure_connected().await?;
            calls += 1;
            match self.transport.search(&handle, request).await {
                Ok(outcome) => {
                    tracing::debug!(
                        rows = outcome.records.len(),
                        run_duration = outcome.statistics.run_duration,
                        "Search completed"
                    );
                    return Ok(outcome);
                }
                Err(error) => {
                    if let Some(surfaced) = self.recover(error, &mut retries_left, calls) {
                        return Err(surfaced);
                    }
                }
            }
        }
    }

    /// Lists index names visible to the session.
    ///
    /// # Errors
    /// Same as [`SessionManager::execute`].
    pub async fn list_indexes(&mut self) -> Result<Vec<String>> {
        let mut retries_left = self.config.execute_retries;
        let mut calls = 0u32;
        loop {
            let handle = self.ensure_connected().await?;
            calls += 1;
            match self.transport.list_indexes(&handle).await {
                Ok(indexes) => return Ok(indexes),
                Err(error) => {
                    if let Some(surfaced) = self.recover(error, &mut retries_left, calls) {
                        return Err(surfaced);
                    }
                }
            }
        }
    }

    /// Probes the server and reports reachability and latency.
    ///
    /// Failures are reported in the status rather than returned. The execute
    /// retry budget is not used.
    pub async fn check_connection(&mut self) -> ConnectionStatus {
        let started = Instant::now();
        let elapsed_ms = |start: Instant| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let failed = |error: &SplunkMcpError, latency_ms| ConnectionStatus {
            ok: false,
            latency_ms,
            server_info: None,
            indexes: Vec::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        };

        let handle = match self.ensure_connected().await {
            Ok(handle) => handle,
            Err(e) => return failed(&e, elapsed_ms(started)),
        };

        let info = match self.transport.probe(&handle).await {
            Ok(info) => info,
            Err(e) => {
                if e.is_transient() || matches!(e, TransportError::Unauthorized(_)) {
                    self.mark_stale();
                }
                let error = SplunkMcpError::Connection {
                    attempts: 1,
                    reason: e.to_string(),
                };
                return failed(&error, elapsed_ms(started));
            }
        };
        let latency_ms = elapsed_ms(started);

        let indexes = match self.transport.list_indexes(&handle).await {
            Ok(mut indexes) => {
                indexes.truncate(STATUS_INDEX_LIMIT);
                indexes
            }
            Err(e) => {
                tracing::debug!(error = %e, "Index listing failed during health check");
                Vec::new()
            }
        };

        ConnectionStatus {
            ok: true,
            latency_ms,
            server_info: Some(info),
            indexes,
            error: None,
            error_kind: None,
        }
    }

    /// Ends the session on the server, if any.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.transport.logout(&session.handle).await {
                tracing::warn!(error = %e, "Error closing Splunk session");
            } else {
                tracing::info!("Closed Splunk session");
            }
        }
        self.state = SessionState::Disconnected;
    }
}
