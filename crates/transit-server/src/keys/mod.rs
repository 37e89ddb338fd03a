//! Named transit keys, their versions, and the shared registry that holds them.
//!
//! # Lifecycle
//!
//! 1. [`KeyStore::create_key`] registers a key with version 1.
//! 2. [`KeyStore::rotate`] appends version `latest + 1`; older versions keep
//!    decrypting until `min_decryption_version` is raised.
//! 3. [`KeyStore::configure_key`] toggles `deletion_allowed` and moves the
//!    minimum decryption version.
//! 4. [`KeyStore::delete_key`] removes a key whose `deletion_allowed` is set.
//!
//! # Security invariants
//!
//! - Key material is **never** logged, serialised, or included in errors.
//! - A [`TransitKey`] is immutable once published; every mutation publishes a
//!   new value, so a snapshot taken by a request never changes underneath it.

pub mod store;
pub mod versions;

pub use store::KeyStore;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::protocol::KeyResponse;

use crate::crypto::KeyMaterial;
use crate::error::{Result, TransitError};

/// Longest accepted key name, in bytes.
pub const MAX_KEY_NAME_LEN: usize = 128;

/// Cipher family of a transit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// AES-256-GCM-SIV with 96-bit nonces.
    #[default]
    Aes256GcmSiv,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Aes256GcmSiv => "aes256-gcm-siv",
        }
    }
}

/// How nonces are chosen for a key. Fixed when the key is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceStrategy {
    /// Fresh random nonce on every encryption.
    Random,
    /// Caller-supplied nonce, or one derived from the context sub-key and the
    /// plaintext; identical inputs always produce identical ciphertext.
    Convergent,
}

/// Creation-time options. Neither flag can change afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyOptions {
    pub key_type: KeyType,
    pub derived: bool,
    pub convergent_encryption: bool,
}

/// Mutable configuration; `None` leaves the current value alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyConfig {
    pub deletion_allowed: Option<bool>,
    pub min_decryption_version: Option<u32>,
}

/// Source of fresh key material for new keys and rotations.
#[cfg_attr(test, mockall::automock)]
pub trait KeySource: Send + Sync {
    fn generate(&self) -> KeyMaterial;
}

/// Production [`KeySource`] backed by the OS CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeySource;

impl KeySource for OsKeySource {
    fn generate(&self) -> KeyMaterial {
        KeyMaterial::random()
    }
}

/// One immutable version of a key.
#[derive(Debug, Clone)]
pub struct KeyVersion {
    pub version: u32,
    pub created_unix_secs: u64,
    material: Arc<KeyMaterial>,
}

impl KeyVersion {
    pub(crate) fn new(version: u32, material: KeyMaterial) -> Self {
        Self {
            version,
            created_unix_secs: now_unix_secs(),
            material: Arc::new(material),
        }
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

/// A named key and all of its versions.
///
/// `versions[i].version == i + 1` always holds.
#[derive(Debug, Clone)]
pub struct TransitKey {
    name: String,
    key_type: KeyType,
    derived: bool,
    convergent_encryption: bool,
    deletion_allowed: bool,
    min_decryption_version: u32,
    versions: Vec<KeyVersion>,
}

impl TransitKey {
    pub(crate) fn new(name: String, options: KeyOptions, material: KeyMaterial) -> Self {
        Self {
            name,
            key_type: options.key_type,
            derived: options.derived,
            convergent_encryption: options.convergent_encryption,
            deletion_allowed: false,
            min_decryption_version: 1,
            versions: vec![KeyVersion::new(1, material)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn deletion_allowed(&self) -> bool {
        self.deletion_allowed
    }

    pub fn min_decryption_version(&self) -> u32 {
        self.min_decryption_version
    }

    pub fn nonce_strategy(&self) -> NonceStrategy {
        if self.convergent_encryption {
            NonceStrategy::Convergent
        } else {
            NonceStrategy::Random
        }
    }

    /// Public view of this key, without key material.
    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            name: self.name.clone(),
            key_type: self.key_type,
            derived: self.derived,
            convergent_encryption: self.convergent_encryption,
            deletion_allowed: self.deletion_allowed,
            min_decryption_version: self.min_decryption_version,
            latest_version: self.latest_version(),
            versions: self
                .versions
                .iter()
                .map(|v| (v.version, v.created_unix_secs))
                .collect(),
        }
    }

    /// Apply a configuration change, returning the updated key.
    ///
    /// # Errors
    ///
    /// Returns [`TransitError::InvalidArgument`] if `min_decryption_version`
    /// falls outside `1..=latest_version`.
    pub(crate) fn with_config(&self, config: KeyConfig) -> Result<Self> {
        let mut next = self.clone();
        if let Some(allowed) = config.deletion_allowed {
            next.deletion_allowed = allowed;
        }
        if let Some(min) = config.min_decryption_version {
            let latest = self.latest_version();
            if min == 0 || min > latest {
                return Err(TransitError::InvalidArgument(format!(
                    "min_decryption_version must be between 1 and {latest}, got {min}"
                )));
            }
            next.min_decryption_version = min;
        }
        Ok(next)
    }
}

/// Public, serialisable description of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    pub name: String,
    pub key_type: KeyType,
    pub derived: bool,
    pub convergent_encryption: bool,
    pub deletion_allowed: bool,
    pub min_decryption_version: u32,
    pub latest_version: u32,
    pub versions: BTreeMap<u32, u64>,
}

impl From<KeyMetadata> for KeyResponse {
    fn from(meta: KeyMetadata) -> Self {
        KeyResponse {
            name: meta.name,
            key_type: meta.key_type.as_str().to_owned(),
            derived: meta.derived,
            convergent_encryption: meta.convergent_encryption,
            deletion_allowed: meta.deletion_allowed,
            min_decryption_version: meta.min_decryption_version,
            latest_version: meta.latest_version,
            keys: meta.versions,
        }
    }
}

/// Validate a key name before it reaches the registry.
///
/// # Errors
///
/// Returns [`TransitError::InvalidArgument`] for empty names, names longer than
/// [`MAX_KEY_NAME_LEN`], or names containing `/`.
pub fn validate_key_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransitError::InvalidArgument("key name must not be empty".into()));
    }
    if name.len() > MAX_KEY_NAME_LEN {
        return Err(TransitError::InvalidArgument(format!(
            "key name too long: {} bytes (max {MAX_KEY_NAME_LEN})",
            name.len()
        )));
    }
    if name.contains('/') {
        return Err(TransitError::InvalidArgument("key name must not contain '/'".into()));
    }
    Ok(())
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(options: KeyOptions) -> TransitKey {
        TransitKey::new("mykey".into(), options, KeyMaterial::random())
    }

    #[test]
    fn fresh_key_defaults() {
        let meta = key(KeyOptions::default()).metadata();
        assert!(meta.key_type.as_str().starts_with("aes"));
        assert_eq!(meta.name, "mykey");
        assert!(!meta.deletion_allowed);
        assert!(!meta.derived);
        assert_eq!(meta.min_decryption_version, 1);
        assert_eq!(meta.latest_version, 1);
        assert_eq!(meta.versions.len(), 1);
    }

    #[test]
    fn nonce_strategy_follows_creation_flag() {
        let plain = key(KeyOptions::default());
        assert_eq!(plain.nonce_strategy(), NonceStrategy::Random);
        let convergent = key(KeyOptions {
            derived: true,
            convergent_encryption: true,
            ..KeyOptions::default()
        });
        assert_eq!(convergent.nonce_strategy(), NonceStrategy::Convergent);
    }

    #[test]
    fn config_rejects_out_of_range_min_version() {
        let k = key(KeyOptions::default());
        for min in [0, 2] {
            let cfg = KeyConfig {
                min_decryption_version: Some(min),
                ..KeyConfig::default()
            };
            assert!(matches!(
                k.with_config(cfg),
                Err(TransitError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn config_leaves_unset_fields_alone() {
        let k = key(KeyOptions::default());
        let next = k
            .with_config(KeyConfig {
                deletion_allowed: Some(true),
                ..KeyConfig::default()
            })
            .unwrap();
        assert!(next.deletion_allowed());
        assert_eq!(next.min_decryption_version(), 1);
        assert!(!k.deletion_allowed(), "original snapshot must not change");
    }

    #[test]
    fn key_names_are_validated() {
        assert!(validate_key_name("mykey").is_ok());
        assert!(validate_key_name("").is_err());
        assert!(validate_key_name("a/b").is_err());
        assert!(validate_key_name(&"k".repeat(MAX_KEY_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn metadata_converts_to_wire_type() {
        let resp: KeyResponse = key(KeyOptions::default()).metadata().into();
        assert_eq!(resp.key_type, "aes256-gcm-siv");
        assert_eq!(resp.latest_version, 1);
    }
}
