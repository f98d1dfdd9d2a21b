//! Secure credential container with automatic memory zeroing.
//!
//! # Security
//! - Passwords are stored in `Zeroizing<T>` containers
//! - Memory is automatically cleared when credentials go out of scope
//! - Passwords are never exposed in debug output or logs

use zeroize::{Zeroize, Zeroizing};

use super::vault::{CredentialVault, EncryptedCredential};
use crate::Result;
use crate::error::SplunkMcpError;

/// Splunk username and password, zeroed on drop.
///
/// # Example
///
/// ```rust
/// use splunk_mcp_core::security::Credentials;
///
/// let creds = Credentials::new("admin".to_string(), "changeme".to_string());
/// assert_eq!(creds.username(), "admin");
/// assert!(!format!("{:?}", creds).contains("changeme"));
/// // Password is automatically zeroed when `creds` is dropped
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Creates new credentials with automatic memory zeroing.
    pub fn new(username: String, password: String) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Gets the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Borrows the password for the single call that sends it to the server.
    pub fn expose_password(&self) -> &str {
        &self.password
    }

    /// Checks if a non-empty password is present without exposing it.
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_str())
            .field("password", &"****")
            .finish()
    }
}

/// Where the session manager gets its credentials from.
///
/// Encrypted credentials are only opened when a session actually needs them,
/// so a process can start without touching the vault.
#[derive(Clone)]
pub enum CredentialSource {
    /// Password sealed to this machine by the vault
    Encrypted {
        username: String,
        sealed: EncryptedCredential,
        vault: CredentialVault,
    },
    /// Password stored in plain text in the configuration file
    Plaintext(Credentials),
}

impl CredentialSource {
    /// Username the credentials authenticate as.
    pub fn username(&self) -> &str {
        match self {
            Self::Encrypted { username, .. } => username,
            Self::Plaintext(credentials) => credentials.username(),
        }
    }

    /// Whether the password is sealed by the vault.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted { .. })
    }

    /// Produces usable credentials, decrypting if necessary.
    ///
    /// # Errors
    /// Returns the vault's error (`WrongMachine`, `CorruptCredential`,
    /// `Fingerprint`) unchanged, or a configuration error when the password
    /// is empty.
    pub fn resolve(&self) -> Result<Credentials> {
        let credentials = match self {
            Self::Encrypted {
                username,
                sealed,
                vault,
            } => {
                let password = vault.decrypt(sealed)?;
                tracing::debug!(username = %username, "Decrypted stored Splunk password");
                Credentials::new(username.clone(), password.to_string())
            }
            Self::Plaintext(credentials) => credentials.clone(),
        };
        if !credentials.has_password() {
            return Err(SplunkMcpError::configuration(format!(
                "Password for '{}' is empty",
                credentials.username()
            )));
        }
        Ok(credentials)
    }
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypted { username, .. } => f
                .debug_struct("Encrypted")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Plaintext(credentials) => f.debug_tuple("Plaintext").field(credentials).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::SplunkMcpError;
    use crate::security::fingerprint::{HostAttributes, StaticFingerprint};
    use crate::security::vault::KdfParams;

    fn vault(user: &str) -> CredentialVault {
        let host = HostAttributes::new("00:11:22:33:44:55", user, "/home/test", "linux-x86_64");
        CredentialVault::new(Arc::new(StaticFingerprint::new(host)))
            .with_kdf_params(KdfParams::new(1024, 1, 1))
    }

    #[test]
    fn test_credentials_new() {
        let creds = Credentials::new("testuser".to_string(), "testpass".to_string());
        assert_eq!(creds.username(), "testuser");
        assert_eq!(creds.expose_password(), "testpass");
        assert!(creds.has_password());
    }

    #[test]
    fn test_credentials_empty_password() {
        let creds = Credentials::new("testuser".to_string(), String::new());
        assert!(!creds.has_password());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin".to_string(), "hunter2".to_string());
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_credential_source_plaintext() {
        let source = CredentialSource::Plaintext(Credentials::new(
            "admin".to_string(),
            "changeme".to_string(),
        ));
        assert!(!source.is_encrypted());
        assert_eq!(source.username(), "admin");
        assert_eq!(source.resolve().unwrap().expose_password(), "changeme");
    }

    #[test]
    fn test_credential_source_rejects_empty_password() {
        let source =
            CredentialSource::Plaintext(Credentials::new("admin".to_string(), String::new()));
        let error = source.resolve().unwrap_err();
        assert_eq!(error.kind(), "configuration");
        assert!(error.to_string().contains("'admin' is empty"));
    }

    #[test]
    fn test_credential_source_encrypted_resolves() {
        let vault = vault("svc");
        let sealed = vault.encrypt_for_this_machine("s3cret").unwrap();
        let source = CredentialSource::Encrypted {
            username: "svc_splunk".to_string(),
            sealed,
            vault,
        };

        assert!(source.is_encrypted());
        let creds = source.resolve().unwrap();
        assert_eq!(creds.username(), "svc_splunk");
        assert_eq!(creds.expose_password(), "s3cret");
        assert!(!format!("{:?}", source).contains("s3cret"));
    }

    #[test]
    fn test_credential_source_wrong_machine_propagates() {
        let sealed = vault("svc").encrypt_for_this_machine("s3cret").unwrap();
        let source = CredentialSource::Encrypted {
            username: "svc_splunk".to_string(),
            sealed,
            vault: vault("someone-else"),
        };

        assert!(matches!(source.resolve(), Err(SplunkMcpError::WrongMachine)));
    }
}
