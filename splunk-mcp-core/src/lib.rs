//! Core library for the Splunk MCP server.
//!
//! This crate provides the machine-bound credential vault, the resilient
//! Splunk session manager, result paging and response formatting used by the
//! `splunk-mcp` binary.
//!
//! # Security Guarantees
//! - Stored passwords are sealed with AES-GCM under a key derived from the
//!   host fingerprint; they only decrypt on the machine that sealed them
//! - Decrypted passwords and session keys live in zeroizing containers
//! - No credentials appear in logs, errors, or tool responses
//!
//! # Architecture
//! Data flows configuration → [`security::CredentialVault`] →
//! [`session::SessionManager`] → [`pager::paginate`] → [`format`].
//! The session manager talks to Splunk through the
//! [`session::SearchTransport`] trait so tests can inject scripted servers.

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod pager;
pub mod security;
pub mod session;

// Re-export commonly used types
pub use config::{Config, LoggingSettings, QuerySettings, SessionSettings, SplunkSettings};
pub use error::{Result, SplunkMcpError};
pub use pager::{PageResult, paginate};
pub use security::{
    CredentialSource, CredentialVault, Credentials, EncryptedCredential, Fingerprint,
    FingerprintSource, HostAttributes, KdfParams, MachineFingerprint,
};
pub use session::{
    ConnectionStatus, RestTransport, SearchOutcome, SearchRequest, SearchTransport, SessionConfig,
    SessionManager, SessionState, SharedSession,
};
