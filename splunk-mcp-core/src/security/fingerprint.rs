//! Host fingerprinting for machine-bound credentials.
//!
//! A fingerprint is a SHA-256 digest over four host attributes, concatenated in
//! a fixed order: the primary network interface's hardware address, the OS user
//! name, the normalized home directory, and an `os-arch` platform tag. The same
//! host always yields the same fingerprint; changing any attribute changes it.
//!
//! # Security
//! - The fingerprint itself is never stored; only a one-way hash of it is kept
//!   next to the ciphertext (see [`Fingerprint::binding_hash`])
//! - A missing hardware address is a hard error rather than a silently weaker
//!   binding

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Result;
use crate::error::SplunkMcpError;

/// Number of hex characters of the binding hash kept in configuration.
const BINDING_HASH_HEX_LEN: usize = 16;

/// Separator between attributes so that `("ab", "c")` and `("a", "bc")` differ.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Raw host attributes a fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAttributes {
    /// Hardware address of the primary network interface (e.g. `AA:BB:CC:DD:EE:FF`)
    pub hardware_address: String,
    /// OS-reported user name
    pub user_name: String,
    /// Home directory, normalized
    pub home_dir: String,
    /// Platform tag such as `linux-x86_64`
    pub platform: String,
}

impl HostAttributes {
    /// Builds attributes, normalizing the home directory.
    pub fn new(
        hardware_address: impl Into<String>,
        user_name: impl Into<String>,
        home_dir: impl AsRef<str>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            hardware_address: hardware_address.into(),
            user_name: user_name.into(),
            home_dir: normalize_home(home_dir.as_ref()),
            platform: platform.into(),
        }
    }

    /// Collects attributes from the current host.
    ///
    /// # Errors
    /// Returns [`SplunkMcpError::Fingerprint`] when the hardware address or the
    /// home directory cannot be determined.
    pub fn detect() -> Result<Self> {
        let hardware_address = match mac_address::get_mac_address() {
            Ok(Some(mac)) => mac.to_string(),
            Ok(None) => {
                return Err(SplunkMcpError::fingerprint(
                    "no network interface with a hardware address was found",
                ));
            }
            Err(e) => {
                return Err(SplunkMcpError::fingerprint(format!(
                    "failed to read hardware address: {}",
                    e
                )));
            }
        };

        // Windows uses USERNAME, Unix-like systems use USER
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string());

        let home_dir = dirs::home_dir()
            .ok_or_else(|| SplunkMcpError::fingerprint("home directory could not be determined"))?;

        Ok(Self::new(
            hardware_address,
            user_name,
            home_dir.to_string_lossy(),
            platform_tag(),
        ))
    }
}

/// Returns the `os-arch` tag of the running binary.
pub fn platform_tag() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn normalize_home(home: &str) -> String {
    let trimmed = home.trim();
    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() && !trimmed.is_empty() {
        // Root directory; keep a single separator
        trimmed[..1].to_string()
    } else {
        stripped.to_string()
    }
}

/// Opaque host identifier derived from [`HostAttributes`].
///
/// Zeroed on drop. `Debug` output never shows the digest.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Derives the fingerprint for the given attributes.
    pub fn from_attributes(attributes: &HostAttributes) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            &attributes.hardware_address,
            &attributes.user_name,
            &attributes.home_dir,
            &attributes.platform,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([FIELD_SEPARATOR]);
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Raw fingerprint bytes, used as key-derivation input.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// One-way hash stored alongside the ciphertext for mismatch detection.
    ///
    /// This is the first 16 hex characters of SHA-256 over the fingerprint,
    /// so the fingerprint cannot be recovered from configuration.
    pub fn binding_hash(&self) -> String {
        let digest = format!("{:x}", Sha256::digest(self.0));
        digest[..BINDING_HASH_HEX_LEN].to_string()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fingerprint").field(&"<redacted>").finish()
    }
}

/// Source of the current host's fingerprint.
///
/// The vault recomputes the fingerprint on every decrypt through this trait,
/// which lets tests substitute fabricated hosts.
pub trait FingerprintSource: Send + Sync {
    /// Computes the fingerprint of the current host.
    ///
    /// # Errors
    /// Returns [`SplunkMcpError::Fingerprint`] if a required attribute is missing.
    fn compute(&self) -> Result<Fingerprint>;
}

/// Fingerprint source reading the live host attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineFingerprint;

impl FingerprintSource for MachineFingerprint {
    fn compute(&self) -> Result<Fingerprint> {
        let attributes = HostAttributes::detect()?;
        Ok(Fingerprint::from_attributes(&attributes))
    }
}

/// Fingerprint source with fixed attributes, for tests and tooling.
#[derive(Debug, Clone)]
pub struct StaticFingerprint {
    attributes: HostAttributes,
}

impl StaticFingerprint {
    /// Creates a source that always reports `attributes`.
    pub fn new(attributes: HostAttributes) -> Self {
        Self { attributes }
    }
}

impl FingerprintSource for StaticFingerprint {
    fn compute(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::from_attributes(&self.attributes))
    }
}
