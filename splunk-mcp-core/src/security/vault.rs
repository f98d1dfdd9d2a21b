//! Machine-bound credential vault.
//!
//! Secrets are encrypted with AES-256-GCM under a key derived by Argon2id from
//! the host [`Fingerprint`] and a random salt. A short one-way hash of the
//! fingerprint travels with the ciphertext so that decrypting on another host
//! fails with [`SplunkMcpError::WrongMachine`] before any cryptography runs,
//! while tampering on the right host fails with
//! [`SplunkMcpError::CorruptCredential`].
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption with a fresh random 96-bit nonce
//! - Argon2id key derivation with a fresh random 128-bit salt per encryption
//! - Derived keys and decrypted secrets live in `Zeroizing` containers
//! - Plaintext is never logged
//!
//! # Stored Format
//! All three fields are URL-safe base64 or hex strings so they can be pasted
//! into YAML: `password_encrypted` is `nonce || ciphertext || tag`,
//! `password_salt` is the raw salt, `machine_hash` is
//! [`Fingerprint::binding_hash`].

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, rand_core::RngCore},
};
use argon2::{Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::fingerprint::{Fingerprint, FingerprintSource, MachineFingerprint};
use crate::Result;
use crate::error::SplunkMcpError;

/// AES-GCM nonce size: 96 bits (NIST SP 800-38D §8.2.1)
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits (NIST SP 800-38D §5.2.1)
const AES_GCM_TAG_SIZE: usize = 16;

/// AES key size: 256 bits
const AES_KEY_SIZE: usize = 32;

/// Argon2id salt size: 128 bits (RFC 9106 §4 minimum)
const ARGON2_SALT_SIZE: usize = 16;

/// Argon2id memory cost: 64 MiB (65536 KiB), OWASP high-security guidance
const ARGON2_MEMORY_COST: u32 = 65536;

/// Argon2id time cost: 3 passes over memory (RFC 9106 §4)
const ARGON2_TIME_COST: u32 = 3;

/// Argon2id parallelism: 4 lanes
const ARGON2_PARALLELISM: u32 = 4;

/// Argon2id cost parameters.
///
/// The parameters are not stored with the credential, so the vault that
/// decrypts must use the same values as the one that encrypted.
/// [`KdfParams::default`] is the production setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: ARGON2_MEMORY_COST,
            time_cost: ARGON2_TIME_COST,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Creates explicit KDF parameters.
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Validates that Argon2id accepts the parameters.
    ///
    /// # Errors
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism < 1 {
            return Err(SplunkMcpError::configuration(
                "Parallelism must be at least 1",
            ));
        }
        if self.time_cost < 1 {
            return Err(SplunkMcpError::configuration(
                "Time cost must be at least 1 iteration",
            ));
        }
        let minimum_memory = self.parallelism.saturating_mul(8);
        if self.memory_cost < minimum_memory {
            return Err(SplunkMcpError::configuration(format!(
                "Memory cost must be at least {} KiB for parallelism {}",
                minimum_memory, self.parallelism
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        self.validate()?;
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(AES_KEY_SIZE),
        )
        .map_err(|e| SplunkMcpError::configuration(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A secret sealed to one host.
///
/// Serializes with the configuration field names, so the encryption utility
/// can print it straight into the `splunk:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    /// URL-safe base64 of `nonce || ciphertext || tag`
    #[serde(rename = "password_encrypted")]
    pub ciphertext: String,
    /// URL-safe base64 of the Argon2id salt
    #[serde(rename = "password_salt")]
    pub salt: String,
    /// One-way hash of the fingerprint used at encryption time
    #[serde(rename = "machine_hash")]
    pub fingerprint_hash: String,
}

/// Derives the AES-256 key for `(fingerprint, salt)`.
fn derive_key(
    kdf: &KdfParams,
    fingerprint: &Fingerprint,
    salt: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_SIZE]>> {
    let argon2 = kdf.argon2()?;
    let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
    argon2
        .hash_password_into(fingerprint.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| SplunkMcpError::encryption(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypts and decrypts secrets bound to the host fingerprint.
#[derive(Clone)]
pub struct CredentialVault {
    fingerprints: Arc<dyn FingerprintSource>,
    kdf: KdfParams,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Creates a vault reading fingerprints from `fingerprints`.
    pub fn new(fingerprints: Arc<dyn FingerprintSource>) -> Self {
        Self {
            fingerprints,
            kdf: KdfParams::default(),
        }
    }

    /// Creates a vault bound to the live host attributes.
    pub fn for_this_machine() -> Self {
        Self::new(Arc::new(MachineFingerprint))
    }

    /// Builder method to override the Argon2id cost parameters.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Recomputes the current host fingerprint.
    ///
    /// # Errors
    /// Propagates [`SplunkMcpError::Fingerprint`] from the source.
    pub fn current_fingerprint(&self) -> Result<Fingerprint> {
        self.fingerprints.compute()
    }

    /// Encrypts `plaintext` for the host identified by `fingerprint`.
    ///
    /// Every call draws a fresh salt and nonce, so encrypting the same secret
    /// twice yields different outputs.
    ///
    /// # Errors
    /// Returns an encryption error if key derivation or sealing fails.
    pub fn encrypt(&self, plaintext: &str, fingerprint: &Fingerprint) -> Result<EncryptedCredential> {
        let mut salt = [0u8; ARGON2_SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let key = derive_key(&self.kdf, fingerprint, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| SplunkMcpError::encryption(format!("Encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(AES_GCM_NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        Ok(EncryptedCredential {
            ciphertext: URL_SAFE.encode(&blob),
            salt: URL_SAFE.encode(salt),
            fingerprint_hash: fingerprint.binding_hash(),
        })
    }

    /// Encrypts `plaintext` for the current host.
    ///
    /// # Errors
    /// Fails if the fingerprint cannot be computed or encryption fails.
    pub fn encrypt_for_this_machine(&self, plaintext: &str) -> Result<EncryptedCredential> {
        let fingerprint = self.current_fingerprint()?;
        self.encrypt(plaintext, &fingerprint)
    }

    /// Decrypts a credential on the current host.
    ///
    /// # Errors
    /// - [`SplunkMcpError::Fingerprint`] if the host cannot be fingerprinted
    /// - [`SplunkMcpError::WrongMachine`] if the credential belongs to another host
    /// - [`SplunkMcpError::CorruptCredential`] if the data fails authentication
    pub fn decrypt(&self, credential: &EncryptedCredential) -> Result<Zeroizing<String>> {
        let fingerprint = self.current_fingerprint()?;
        self.decrypt_with(credential, &fingerprint)
    }

    /// Decrypts a credential as if running on the host with `fingerprint`.
    ///
    /// The binding hash is compared before any decoding or key derivation.
    ///
    /// # Errors
    /// Same as [`CredentialVault::decrypt`], minus fingerprint computation.
    pub fn decrypt_with(
        &self,
        credential: &EncryptedCredential,
        fingerprint: &Fingerprint,
    ) -> Result<Zeroizing<String>> {
        if credential.fingerprint_hash.trim() != fingerprint.binding_hash() {
            tracing::warn!("Stored credential is bound to a different machine");
            return Err(SplunkMcpError::WrongMachine);
        }

        let salt = URL_SAFE
            .decode(credential.salt.trim())
            .map_err(|e| SplunkMcpError::corrupt_credential(format!("invalid salt encoding: {}", e)))?;
        if salt.len() != ARGON2_SALT_SIZE {
            return Err(SplunkMcpError::corrupt_credential(format!(
                "invalid salt length: expected {}, got {}",
                ARGON2_SALT_SIZE,
                salt.len()
            )));
        }

        let blob = URL_SAFE.decode(credential.ciphertext.trim()).map_err(|e| {
            SplunkMcpError::corrupt_credential(format!("invalid ciphertext encoding: {}", e))
        })?;
        if blob.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(SplunkMcpError::corrupt_credential(format!(
                "ciphertext too short ({} bytes)",
                blob.len()
            )));
        }
        let (nonce, sealed) = blob.split_at(AES_GCM_NONCE_SIZE);

        let key = derive_key(&self.kdf, fingerprint, &salt)
            .map_err(|e| SplunkMcpError::corrupt_credential(e.to_string()))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| SplunkMcpError::corrupt_credential("authentication tag mismatch"))?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| SplunkMcpError::corrupt_credential("decrypted secret is not UTF-8"))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
