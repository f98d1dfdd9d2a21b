//! Credential protection: host fingerprinting, the machine-bound vault, and
//! zeroizing credential containers.
//!
//! # Security Guarantees
//! - Credentials are stored in `Zeroizing` containers for automatic memory clearing
//! - Encrypted passwords only decrypt on the machine that sealed them
//! - All sensitive data is redacted from logs and error messages
//!
//! # Module Structure
//! - `fingerprint`: Stable host identifier and its one-way binding hash
//! - `vault`: AES-GCM encryption with Argon2id key derivation from the fingerprint
//! - `credentials`: Secure credential container and its configured source

mod credentials;
pub mod fingerprint;
pub mod vault;

// Re-export public types
pub use credentials::{CredentialSource, Credentials};
pub use fingerprint::{Fingerprint, FingerprintSource, HostAttributes, MachineFingerprint};
pub use vault::{CredentialVault, EncryptedCredential, KdfParams};
