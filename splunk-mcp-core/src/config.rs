//! YAML configuration for the Splunk MCP server.
//!
//! # Example
//!
//! ```yaml
//! splunk:
//!   host: splunk.example.com
//!   port: 8089
//!   username: svc_splunk
//!   password_encrypted: "..."
//!   password_salt: "..."
//!   machine_hash: "3f2a9c0d1e4b5a6c"
//!
//! indexes:
//!   uat: app_uat
//!   prod: app_prod
//!
//! query_settings:
//!   default_earliest_time: -30d
//!   max_results: 10000
//!   page_size: 1000
//! ```
//!
//! The configuration is validated once at load time and is immutable
//! afterwards. Any structural problem is a [`SplunkMcpError::Configuration`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::SplunkMcpError;
use crate::security::{CredentialSource, CredentialVault, Credentials, EncryptedCredential};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Environments every deployment must map to an index.
pub const REQUIRED_ENVIRONMENTS: [&str; 2] = ["uat", "prod"];

/// Largest `max_results` a single search may request.
pub const MAX_RESULTS_LIMIT: usize = 50_000;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Splunk connection settings
    pub splunk: SplunkSettings,
    /// Environment name to index name
    pub indexes: BTreeMap<String, String>,
    /// Query defaults and result shaping
    pub query_settings: QuerySettings,
    /// Session lifetime and retry budgets
    #[serde(default)]
    pub session: SessionSettings,
    /// Log level and destination
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Connection settings for the Splunk management port.
#[derive(Clone, Serialize, Deserialize)]
pub struct SplunkSettings {
    /// Splunk host name or address
    pub host: String,
    /// Management port, usually 8089
    pub port: u16,
    /// `https` (default) or `http`
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Account used for every environment
    pub username: String,
    /// Sealed password, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_encrypted: Option<String>,
    /// KDF salt of the sealed password, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_salt: Option<String>,
    /// Binding hash of the machine that sealed the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_hash: Option<String>,
    /// Plain text password; accepted but discouraged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Verify the server certificate; off for self-signed deployments
    #[serde(default)]
    pub verify_ssl: bool,
}

fn default_scheme() -> String {
    "https".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl std::fmt::Debug for SplunkSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplunkSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password_encrypted", &self.password_encrypted.is_some())
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("timeout", &self.timeout)
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

impl SplunkSettings {
    /// Base URL of the management API, e.g. `https://splunk.local:8089/`.
    ///
    /// # Errors
    /// Returns a configuration error if host or scheme do not form a URL.
    pub fn base_url(&self) -> Result<url::Url> {
        let raw = format!("{}://{}:{}/", self.scheme, self.host, self.port);
        url::Url::parse(&raw).map_err(|e| {
            SplunkMcpError::configuration(format!("Invalid Splunk address '{}': {}", raw, e))
        })
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The sealed password, if the configuration carries one.
    pub fn encrypted_credential(&self) -> Option<EncryptedCredential> {
        match (&self.password_encrypted, &self.password_salt, &self.machine_hash) {
            (Some(ciphertext), Some(salt), Some(hash)) => Some(EncryptedCredential {
                ciphertext: ciphertext.clone(),
                salt: salt.clone(),
                fingerprint_hash: hash.clone(),
            }),
            _ => None,
        }
    }

    /// Chooses where credentials come from without decrypting anything.
    ///
    /// An encrypted password wins over a plain text one.
    ///
    /// # Errors
    /// Returns a configuration error if no usable password is configured.
    pub fn credential_source(&self, vault: CredentialVault) -> Result<CredentialSource> {
        if let Some(sealed) = self.encrypted_credential() {
            return Ok(CredentialSource::Encrypted {
                username: self.username.clone(),
                sealed,
                vault,
            });
        }
        match &self.password {
            Some(password) => {
                tracing::warn!(
                    "Using plain text password from configuration; run `splunk-mcp encrypt-password` to seal it"
                );
                Ok(CredentialSource::Plaintext(Credentials::new(
                    self.username.clone(),
                    password.clone(),
                )))
            }
            None => Err(SplunkMcpError::configuration(
                "No password configured: set password_encrypted, password_salt and machine_hash",
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SplunkMcpError::configuration("splunk.host cannot be empty"));
        }
        if self.port == 0 {
            return Err(SplunkMcpError::configuration(
                "splunk.port must be greater than 0",
            ));
        }
        if self.username.trim().is_empty() {
            return Err(SplunkMcpError::configuration(
                "splunk.username cannot be empty",
            ));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(SplunkMcpError::configuration(format!(
                "splunk.scheme must be http or https, got '{}'",
                self.scheme
            )));
        }
        if self.timeout == 0 {
            return Err(SplunkMcpError::configuration(
                "splunk.timeout must be greater than 0",
            ));
        }

        let sealed_parts = [
            ("password_encrypted", self.password_encrypted.is_some()),
            ("password_salt", self.password_salt.is_some()),
            ("machine_hash", self.machine_hash.is_some()),
        ];
        let present = sealed_parts.iter().filter(|(_, set)| *set).count();
        if present > 0 && present < sealed_parts.len() {
            let missing: Vec<&str> = sealed_parts
                .iter()
                .filter(|(_, set)| !*set)
                .map(|(name, _)| *name)
                .collect();
            return Err(SplunkMcpError::configuration(format!(
                "Encrypted password is incomplete, missing: {}",
                missing.join(", ")
            )));
        }
        if present == 0 && self.password.is_none() {
            return Err(SplunkMcpError::configuration(
                "No password configured: run `splunk-mcp encrypt-password` and add its output to the splunk section",
            ));
        }

        self.base_url().map(|_| ())
    }
}

/// Query defaults and result shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Earliest time used when a query names none
    pub default_earliest_time: String,
    /// Latest time used when a query names none
    pub default_latest_time: String,
    /// Hard cap on records returned by one search
    pub max_results: usize,
    /// Records per page before results are previewed instead of returned whole
    pub page_size: usize,
    /// Server-side execution limit in seconds
    pub max_execution_time: u64,
    /// Keep `_raw` in returned records
    pub include_raw_events: bool,
    /// Log each query text at info level
    pub log_queries: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_earliest_time: "-30d".to_string(),
            default_latest_time: "now".to_string(),
            max_results: 10_000,
            page_size: 1000,
            max_execution_time: 300,
            include_raw_events: true,
            log_queries: true,
        }
    }
}

impl QuerySettings {
    /// Deadline applied to a whole tool call.
    pub fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.max_execution_time)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SplunkMcpError::configuration(
                "query_settings.page_size must be greater than 0",
            ));
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.max_results) {
            return Err(SplunkMcpError::configuration(format!(
                "query_settings.max_results must be between 1 and {}, got {}",
                MAX_RESULTS_LIMIT, self.max_results
            )));
        }
        if self.max_execution_time == 0 {
            return Err(SplunkMcpError::configuration(
                "query_settings.max_execution_time must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Session lifetime and retry budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds a session is reused before re-authenticating
    pub ttl_secs: u64,
    /// Connection attempts per `ensure_connected`
    pub connect_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_max_ms: u64,
    /// Whole-call retries of a search after a transport failure
    pub execute_retries: u32,
    /// Randomize each backoff delay by ±20%
    pub jitter: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            connect_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 8000,
            execute_retries: 1,
            jitter: false,
        }
    }
}

impl SessionSettings {
    fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(SplunkMcpError::configuration(
                "session.connect_attempts must be at least 1",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(SplunkMcpError::configuration(
                "session.ttl_secs must be greater than 0",
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(SplunkMcpError::configuration(
                "session.backoff_max_ms cannot be smaller than session.backoff_base_ms",
            ));
        }
        Ok(())
    }
}

/// Log level and destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level name such as `INFO` or `DEBUG`
    pub level: String,
    /// Append logs to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it is empty, malformed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SplunkMcpError::Io {
            context: format!("Failed to read configuration file {}", path.display()),
            source: e,
        })?;
        let config = Self::from_yaml_str(&contents).map_err(|e| match e {
            SplunkMcpError::Yaml { source, .. } => SplunkMcpError::Yaml {
                context: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        tracing::info!(
            path = %path.display(),
            environments = %config.environments().join(", "),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    /// Same as [`Config::from_file`] without the I/O part.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Err(SplunkMcpError::configuration("Configuration file is empty"));
        }
        let config: Self = serde_yaml::from_str(contents).map_err(|e| SplunkMcpError::Yaml {
            context: "configuration".to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    /// Returns the first configuration problem found.
    pub fn validate(&self) -> Result<()> {
        self.splunk.validate()?;
        let mut seen: BTreeMap<String, &str> = BTreeMap::new();
        for environment in self.indexes.keys() {
            if let Some(previous) = seen.insert(environment.to_ascii_lowercase(), environment) {
                return Err(SplunkMcpError::configuration(format!(
                    "Environments '{}' and '{}' differ only by case",
                    previous, environment
                )));
            }
        }
        for environment in REQUIRED_ENVIRONMENTS {
            if self.find_index(environment).is_none() {
                return Err(SplunkMcpError::configuration(format!(
                    "Missing '{}' index in configuration",
                    environment
                )));
            }
        }
        if let Some((environment, _)) = self.indexes.iter().find(|(_, index)| index.trim().is_empty())
        {
            return Err(SplunkMcpError::configuration(format!(
                "Index for environment '{}' cannot be empty",
                environment
            )));
        }
        self.query_settings.validate()?;
        self.session.validate()?;
        Ok(())
    }

    /// Index configured for `environment` (case-insensitive).
    ///
    /// # Errors
    /// Returns a configuration error listing the known environments.
    pub fn index_for_environment(&self, environment: &str) -> Result<&str> {
        self.find_index(environment).ok_or_else(|| {
            SplunkMcpError::configuration(format!(
                "Environment '{}' not found. Available environments: {}",
                environment,
                self.environments().join(", ")
            ))
        })
    }

    /// Exact key first, then the one key equal ignoring ASCII case.
    fn find_index(&self, environment: &str) -> Option<&str> {
        let wanted = environment.trim();
        self.indexes
            .get(wanted)
            .or_else(|| {
                self.indexes
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
                    .map(|(_, index)| index)
            })
            .map(String::as_str)
    }

    /// Configured environment names, sorted.
    pub fn environments(&self) -> Vec<&str> {
        self.indexes.keys().map(String::as_str).collect()
    }

    /// JSON view with password material masked.
    ///
    /// # Errors
    /// Returns a serialization error if the document cannot be encoded.
    pub fn sanitized(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self).map_err(|e| SplunkMcpError::Serialization {
            context: "configuration".to_string(),
            source: e,
        })?;
        if let Some(splunk) = value.get_mut("splunk").and_then(|v| v.as_object_mut()) {
            for (field, mask) in [
                ("password", "***HIDDEN***"),
                ("password_encrypted", "***ENCRYPTED***"),
                ("password_salt", "***SALT***"),
            ] {
                if let Some(slot) = splunk.get_mut(field) {
                    *slot = serde_json::Value::String(mask.to_string());
                }
            }
        }
        Ok(value)
    }
}
