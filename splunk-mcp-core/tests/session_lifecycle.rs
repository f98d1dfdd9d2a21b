//! Session lifecycle tests against a scripted transport.
//!
//! Time is paused, so TTL expiry and backoff delays are driven by
//! `tokio::time::advance` and auto-advance instead of wall-clock sleeps.
#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use splunk_mcp_core::session::{
    ConnectionHandle, RetryPolicy, SearchOutcome, SearchRequest, SearchTransport, ServerInfo,
    SessionConfig, SessionManager, SessionState, TransportError,
};
use splunk_mcp_core::{CredentialSource, Credentials, SplunkMcpError};

/// Transport whose replies are queued up front. An empty queue means success.
#[derive(Default)]
struct ScriptedTransport {
    login_script: Mutex<VecDeque<Result<(), TransportError>>>,
    search_script: Mutex<VecDeque<Result<(), TransportError>>>,
    probe_script: Mutex<VecDeque<Result<(), TransportError>>>,
    logins: AtomicU32,
    searches: AtomicU32,
    probes: AtomicU32,
    logged_out: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn failing_logins(errors: impl IntoIterator<Item = TransportError>) -> Self {
        let transport = Self::default();
        transport
            .login_script
            .lock()
            .unwrap()
            .extend(errors.into_iter().map(Err));
        transport
    }

    fn failing_searches(errors: impl IntoIterator<Item = TransportError>) -> Self {
        let transport = Self::default();
        transport
            .search_script
            .lock()
            .unwrap()
            .extend(errors.into_iter().map(Err));
        transport
    }

    fn next(script: &Mutex<VecDeque<Result<(), TransportError>>>) -> Result<(), TransportError> {
        script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    fn searches(&self) -> u32 {
        self.searches.load(Ordering::SeqCst)
    }

    fn logged_out(&self) -> Vec<String> {
        self.logged_out.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchTransport for ScriptedTransport {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<ConnectionHandle, TransportError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Self::next(&self.login_script)?;
        Ok(ConnectionHandle::new(format!(
            "{}-session-{}",
            credentials.username(),
            n
        )))
    }

    async fn probe(&self, _handle: &ConnectionHandle) -> Result<ServerInfo, TransportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.probe_script)?;
        Ok(ServerInfo {
            server_name: "sh01".to_string(),
            version: "9.2.1".to_string(),
            build: "78803f08aabb".to_string(),
        })
    }

    async fn search(
        &self,
        handle: &ConnectionHandle,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, TransportError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.search_script)?;
        let mut row = serde_json::Map::new();
        row.insert("query".into(), request.query.clone().into());
        row.insert("session".into(), handle.session_key().to_string().into());
        Ok(SearchOutcome {
            records: vec![row],
            ..SearchOutcome::default()
        })
    }

    async fn list_indexes(&self, _handle: &ConnectionHandle) -> Result<Vec<String>, TransportError> {
        Ok((0..15).map(|i| format!("index_{:02}", i)).collect())
    }

    async fn logout(&self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        self.logged_out
            .lock()
            .unwrap()
            .push(handle.session_key().to_string());
        Ok(())
    }
}

fn credentials() -> CredentialSource {
    CredentialSource::Plaintext(Credentials::new(
        "svc_splunk".to_string(),
        "changeme".to_string(),
    ))
}

fn config() -> SessionConfig {
    SessionConfig {
        ttl: Duration::from_secs(3600),
        connect_policy: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: false,
        },
        execute_retries: 1,
    }
}

fn manager(transport: ScriptedTransport) -> SessionManager<ScriptedTransport> {
    SessionManager::new(transport, credentials(), config())
}

fn request() -> SearchRequest {
    SearchRequest::new("index=main error", "-1h", "now", 100)
}

fn refused() -> TransportError {
    TransportError::Unreachable("connection refused".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_session_is_reused_within_ttl() {
    let mut session = manager(ScriptedTransport::default());

    session.execute(&request()).await.unwrap();
    tokio::time::advance(Duration::from_secs(1800)).await;
    let outcome = session.execute(&request()).await.unwrap();

    assert_eq!(session.transport().logins(), 1);
    assert_eq!(session.transport().searches(), 2);
    assert_eq!(outcome.records[0]["session"], "svc_splunk-session-1");
    assert_eq!(outcome.records[0]["query"], "search index=main error");
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_reconnects_exactly_once() {
    let mut session = manager(ScriptedTransport::default());
    session.execute(&request()).await.unwrap();

    tokio::time::advance(Duration::from_secs(3601)).await;
    let outcome = session.execute(&request()).await.unwrap();

    assert_eq!(session.transport().logins(), 2);
    assert_eq!(outcome.records[0]["session"], "svc_splunk-session-2");
    assert_eq!(session.stats().reconnects, 1);
    assert_eq!(session.stats().sessions_opened, 2);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.transport().logged_out(), vec!["svc_splunk-session-1"]);

    // The new session is fresh again
    session.execute(&request()).await.unwrap();
    assert_eq!(session.transport().logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundary_is_exclusive() {
    let mut session = manager(ScriptedTransport::default());
    session.ensure_connected().await.unwrap();

    tokio::time::advance(Duration::from_secs(3600)).await;
    session.ensure_connected().await.unwrap();
    assert_eq!(session.transport().logins(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    session.ensure_connected().await.unwrap();
    assert_eq!(session.transport().logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_three_connect_failures_exhaust_budget() {
    let mut session = manager(ScriptedTransport::failing_logins([
        refused(),
        refused(),
        TransportError::Timeout,
    ]));
    let started = tokio::time::Instant::now();

    let error = session.ensure_connected().await.unwrap_err();

    match &error {
        SplunkMcpError::Connection { attempts, reason } => {
            assert_eq!(*attempts, 3);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected connection error, got {:?}", other),
    }
    assert_eq!(session.transport().logins(), 3);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.stats().connect_attempts, 3);
    // Backoff of 1s then 2s between the three attempts
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_connect_succeeds_on_second_attempt() {
    let mut session = manager(ScriptedTransport::failing_logins([refused()]));

    session.ensure_connected().await.unwrap();

    assert_eq!(session.transport().logins(), 2);
    assert_eq!(session.stats().connect_attempts, 2);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_are_not_retried() {
    let mut session = manager(ScriptedTransport::failing_logins([
        TransportError::Unauthorized("Login failed".to_string()),
    ]));

    let error = session.ensure_connected().await.unwrap_err();

    assert!(matches!(error, SplunkMcpError::Authentication { .. }));
    assert_eq!(session.transport().logins(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_execute_reconnects_after_transport_failure() {
    let mut session = manager(ScriptedTransport::failing_searches([refused()]));

    let outcome = session.execute(&request()).await.unwrap();

    assert_eq!(session.transport().searches(), 2);
    assert_eq!(session.transport().logins(), 2);
    assert_eq!(outcome.records[0]["session"], "svc_splunk-session-2");
}

#[tokio::test(start_paused = true)]
async fn test_execute_reconnects_after_server_side_expiry() {
    let mut session = manager(ScriptedTransport::failing_searches([
        TransportError::Unauthorized("session expired".to_string()),
    ]));

    session.execute(&request()).await.unwrap();

    assert_eq!(session.transport().logins(), 2);
    assert_eq!(session.stats().reconnects, 1);
    assert_eq!(session.transport().logged_out(), vec!["svc_splunk-session-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_session_rejection_is_an_authentication_error() {
    let rejected = || TransportError::Unauthorized("session expired".to_string());
    let mut session = manager(ScriptedTransport::failing_searches([rejected(), rejected()]));

    let error = session.execute(&request()).await.unwrap_err();

    assert_eq!(error.kind(), "authentication");
    assert!(error.to_string().contains("Session rejected after reconnect"));
    assert_eq!(session.transport().logins(), 2);
    assert_eq!(session.state(), SessionState::Stale);
}

#[tokio::test(start_paused = true)]
async fn test_second_execute_failure_is_surfaced() {
    let mut session = manager(ScriptedTransport::failing_searches([
        refused(),
        TransportError::Timeout,
    ]));

    let error = session.execute(&request()).await.unwrap_err();

    assert!(matches!(error, SplunkMcpError::Connection { attempts: 2, .. }));
    assert_eq!(session.transport().searches(), 2);
    assert_eq!(session.state(), SessionState::Stale);

    // The next call starts over with a fresh session
    session.execute(&request()).await.unwrap();
    assert_eq!(session.transport().logins(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_query_errors_are_not_retried() {
    let mut session = manager(ScriptedTransport::failing_searches([
        TransportError::SearchFailed("Unknown search command 'foo'".to_string()),
    ]));

    let error = session.execute(&request()).await.unwrap_err();

    assert_eq!(error.kind(), "query_execution");
    assert!(error.to_string().contains("Unknown search command"));
    assert_eq!(session.transport().searches(), 1);
    assert_eq!(session.transport().logins(), 1);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_execute_retry_budget_is_configurable() {
    let mut config = config();
    config.execute_retries = 0;
    let mut session = SessionManager::new(
        ScriptedTransport::failing_searches([refused()]),
        credentials(),
        config,
    );

    let error = session.execute(&request()).await.unwrap_err();

    assert!(matches!(error, SplunkMcpError::Connection { attempts: 1, .. }));
    assert_eq!(session.transport().searches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_check_connection_reports_status() {
    let mut session = manager(ScriptedTransport::default());

    let status = session.check_connection().await;

    assert!(status.ok);
    assert_eq!(status.server_info.unwrap().server_name, "sh01");
    assert_eq!(status.indexes.len(), 10);
    assert!(status.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_check_connection_never_errors() {
    let mut session = manager(ScriptedTransport::failing_logins([
        refused(),
        refused(),
        refused(),
    ]));

    let status = session.check_connection().await;

    assert!(!status.ok);
    assert_eq!(status.error_kind, Some("connection"));
    assert!(status.error.unwrap().contains("3 attempt(s)"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_marks_session_stale() {
    let transport = ScriptedTransport::default();
    transport.probe_script.lock().unwrap().push_back(Err(refused()));
    let mut session = manager(transport);

    let status = session.check_connection().await;
    assert!(!status.ok);
    assert_eq!(session.state(), SessionState::Stale);
    assert_eq!(session.transport().searches(), 0);

    let status = session.check_connection().await;
    assert!(status.ok);
    assert_eq!(session.transport().logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_credential_errors_fail_fast() {
    use splunk_mcp_core::security::fingerprint::StaticFingerprint;
    use splunk_mcp_core::{CredentialVault, HostAttributes, KdfParams};
    use std::sync::Arc;

    let vault_for = |user: &str| {
        let host = HostAttributes::new("00:11:22:33:44:55", user, "/home/x", "linux-x86_64");
        CredentialVault::new(Arc::new(StaticFingerprint::new(host)))
            .with_kdf_params(KdfParams::new(256, 1, 1))
    };
    let sealed = vault_for("alice").encrypt_for_this_machine("pw").unwrap();
    let source = CredentialSource::Encrypted {
        username: "svc_splunk".to_string(),
        sealed,
        vault: vault_for("mallory"),
    };
    let mut session = SessionManager::new(ScriptedTransport::default(), source, config());

    assert!(matches!(
        session.decrypt_startup_credentials(),
        Err(SplunkMcpError::WrongMachine)
    ));
    let error = session.ensure_connected().await.unwrap_err();
    assert!(matches!(error, SplunkMcpError::WrongMachine));
    assert_eq!(session.transport().logins(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_forces_new_session_and_disconnect_logs_out() {
    let mut session = manager(ScriptedTransport::default());
    session.ensure_connected().await.unwrap();

    session.authenticate().await.unwrap();
    assert_eq!(session.transport().logins(), 2);

    assert_eq!(session.transport().logged_out(), vec!["svc_splunk-session-1"]);

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        session.transport().logged_out(),
        vec!["svc_splunk-session-1", "svc_splunk-session-2"]
    );
    assert!(session.session_age().is_none());
}
