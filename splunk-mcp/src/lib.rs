//! Splunk MCP server.
//!
//! Exposes Splunk search as MCP tools over stdio. The heavy lifting lives in
//! `splunk-mcp-core`; this crate wires configuration, the credential vault
//! and the REST transport into a [`server::McpServer`].

pub mod server;
pub mod tools;

use std::sync::Arc;

use splunk_mcp_core::session::{self, RestTransport, SearchTransport};
use splunk_mcp_core::{Config, CredentialVault, Result, SessionConfig, SessionManager};

use crate::server::McpServer;
use crate::tools::ToolDispatcher;

/// Builds a session manager for `config` over `transport`.
///
/// Nothing is decrypted or sent yet.
///
/// # Errors
/// Returns a configuration error when no usable password is configured.
pub fn build_session<T: SearchTransport>(
    config: &Config,
    transport: T,
    vault: CredentialVault,
) -> Result<SessionManager<T>> {
    let credentials = config.splunk.credential_source(vault)?;
    Ok(SessionManager::new(
        transport,
        credentials,
        SessionConfig::from_settings(&config.session),
    ))
}

/// Builds an MCP server over `transport`.
///
/// # Errors
/// Same as [`build_session`].
pub fn build_server<T: SearchTransport + 'static>(
    config: Arc<Config>,
    transport: T,
    vault: CredentialVault,
) -> Result<McpServer<T>> {
    let manager = build_session(&config, transport, vault)?;
    let tools = ToolDispatcher::new(config, session::shared(manager));
    Ok(McpServer::new(tools))
}

/// Builds the production server: REST transport and a vault bound to this
/// machine.
///
/// # Errors
/// Returns a configuration error for an invalid address or missing password.
pub fn build_rest_server(config: Arc<Config>) -> Result<McpServer<RestTransport>> {
    let transport = RestTransport::from_settings(&config.splunk)?;
    build_server(config, transport, CredentialVault::for_this_machine())
}
