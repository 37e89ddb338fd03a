//! Encrypt, decrypt, and rewrap against versioned transit keys.
//!
//! Every operation works on one immutable [`TransitKey`] snapshot taken from
//! the [`KeyStore`], so a concurrent rotation or configuration change is seen
//! either entirely or not at all by a given request.
//!
//! # Payload layout
//!
//! The envelope payload is `nonce (12) || ciphertext || tag (16)`. The
//! associated data is `"<key name>:v<version>"`, which binds a ciphertext to
//! the key and version named in its envelope: relabelling the version segment
//! fails authentication.

use tracing::debug;

use crate::crypto::{cipher, derive, KeyMaterial, NONCE_LEN, TAG_LEN};
use crate::envelope;
use crate::error::{Result, TransitError};
use crate::keys::{KeyStore, KeyVersion, NonceStrategy, TransitKey};

/// Default cap on the size of a single plaintext.
pub const DEFAULT_MAX_PLAINTEXT_BYTES: usize = 1024 * 1024;

/// Optional per-request derivation context and nonce.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TransitContext {
    /// Derivation context; required for derived keys, rejected otherwise.
    pub context: Option<Vec<u8>>,
    /// Explicit nonce; only accepted for convergent keys.
    pub nonce: Option<Vec<u8>>,
}

impl TransitContext {
    /// No context and no nonce.
    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_context(context: impl Into<Vec<u8>>) -> Self {
        Self {
            context: Some(context.into()),
            nonce: None,
        }
    }

    #[cfg(test)]
    pub fn with_nonce(mut self, nonce: impl Into<Vec<u8>>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    fn derivation_context(&self) -> Option<&[u8]> {
        self.context.as_deref().filter(|c| !c.is_empty())
    }
}

impl std::fmt::Debug for TransitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitContext")
            .field("context", &self.context.as_ref().map(Vec::len))
            .field("nonce", &self.nonce.as_ref().map(Vec::len))
            .finish()
    }
}

/// Size limits enforced by the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_plaintext_bytes: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_plaintext_bytes: DEFAULT_MAX_PLAINTEXT_BYTES,
        }
    }
}

/// The transit encryption engine.
///
/// Cheap to clone: the key store is `Arc`-backed.
#[derive(Clone, Debug, Default)]
pub struct CryptoEngine {
    store: KeyStore,
    limits: EngineLimits,
}

impl CryptoEngine {
    pub fn new(store: KeyStore, limits: EngineLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Encrypt `plaintext` under the latest version of `key_name`.
    ///
    /// # Errors
    ///
    /// [`TransitError::KeyNotFound`], [`TransitError::InvalidContext`], or
    /// [`TransitError::InvalidArgument`] for an oversized plaintext.
    pub fn encrypt(&self, key_name: &str, plaintext: &[u8], ctx: &TransitContext) -> Result<String> {
        let key = self.store.get_key(key_name)?;
        let envelope = self.encrypt_with(&key, plaintext, ctx)?;
        debug!(key = %key_name, version = key.latest_version(), "encrypted");
        Ok(envelope)
    }

    /// Decrypt an envelope produced by [`CryptoEngine::encrypt`].
    ///
    /// # Errors
    ///
    /// [`TransitError::MalformedEnvelope`], [`TransitError::KeyNotFound`],
    /// [`TransitError::VersionTooOld`], [`TransitError::VersionNotFound`],
    /// [`TransitError::InvalidContext`], or [`TransitError::AuthenticationFailed`].
    pub fn decrypt(&self, key_name: &str, envelope: &str, ctx: &TransitContext) -> Result<Vec<u8>> {
        let key = self.store.get_key(key_name)?;
        let plaintext = self.decrypt_with(&key, envelope, ctx)?;
        debug!(key = %key_name, "decrypted");
        Ok(plaintext)
    }

    /// Re-encrypt an envelope under the latest key version without returning
    /// the plaintext.
    ///
    /// # Errors
    ///
    /// Any error of [`CryptoEngine::decrypt`]; the minimum decryption version
    /// applies here exactly as it does there.
    pub fn rewrap(&self, key_name: &str, envelope: &str, ctx: &TransitContext) -> Result<String> {
        let key = self.store.get_key(key_name)?;
        let rewrapped = self.rewrap_with(&key, envelope, ctx)?;
        debug!(key = %key_name, version = key.latest_version(), "rewrapped");
        Ok(rewrapped)
    }

    pub(crate) fn encrypt_with(
        &self,
        key: &TransitKey,
        plaintext: &[u8],
        ctx: &TransitContext,
    ) -> Result<String> {
        if plaintext.len() > self.limits.max_plaintext_bytes {
            return Err(TransitError::InvalidArgument(format!(
                "plaintext too large: {} bytes (max {})",
                plaintext.len(),
                self.limits.max_plaintext_bytes
            )));
        }
        let derivation = check_context(key, ctx)?;
        let version = key.latest();
        let active = ActiveKey::resolve(version, derivation)?;

        let nonce = match key.nonce_strategy() {
            NonceStrategy::Random => cipher::random_nonce(),
            NonceStrategy::Convergent => match ctx.nonce.as_deref() {
                Some(supplied) => nonce_array(supplied)?,
                None => derive::convergent_nonce(active.material(), plaintext)?,
            },
        };

        let sealed = cipher::seal(
            active.material().as_bytes(),
            &nonce,
            plaintext,
            associated_data(key, version.version).as_bytes(),
        )?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(envelope::encode(version.version, &payload))
    }

    pub(crate) fn decrypt_with(
        &self,
        key: &TransitKey,
        envelope: &str,
        ctx: &TransitContext,
    ) -> Result<Vec<u8>> {
        let (version_number, payload) = envelope::decode(envelope)?;
        let version = key.version_for_decrypt(version_number)?;
        let derivation = check_context(key, ctx)?;

        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(TransitError::MalformedEnvelope("payload too short"));
        }
        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let nonce = nonce_array(nonce)?;
        if let Some(supplied) = ctx.nonce.as_deref() {
            if supplied != nonce.as_slice() {
                return Err(TransitError::AuthenticationFailed);
            }
        }

        let active = ActiveKey::resolve(version, derivation)?;
        let plaintext = cipher::open(
            active.material().as_bytes(),
            &nonce,
            sealed,
            associated_data(key, version.version).as_bytes(),
        )?;
        Ok(plaintext)
    }

    pub(crate) fn rewrap_with(
        &self,
        key: &TransitKey,
        envelope: &str,
        ctx: &TransitContext,
    ) -> Result<String> {
        let plaintext = self.decrypt_with(key, envelope, ctx)?;
        self.encrypt_with(key, &plaintext, ctx)
    }
}

/// The key actually fed to the cipher: a version's material, or a sub-key
/// derived from it for one context.
enum ActiveKey<'a> {
    Master(&'a KeyMaterial),
    Derived(KeyMaterial),
}

impl<'a> ActiveKey<'a> {
    fn resolve(version: &'a KeyVersion, derivation: Option<&[u8]>) -> Result<Self> {
        match derivation {
            None => Ok(ActiveKey::Master(version.material())),
            Some(context) => Ok(ActiveKey::Derived(derive::derive_subkey(
                version.material(),
                context,
            )?)),
        }
    }

    fn material(&self) -> &KeyMaterial {
        match self {
            ActiveKey::Master(m) => m,
            ActiveKey::Derived(m) => m,
        }
    }
}

/// Check the context and nonce against the key's flags and return the
/// derivation context, if the key is derived.
fn check_context<'c>(key: &TransitKey, ctx: &'c TransitContext) -> Result<Option<&'c [u8]>> {
    let derivation = ctx.derivation_context();
    match (key.is_derived(), derivation) {
        (true, None) => return Err(TransitError::InvalidContext("derived key requires a context")),
        (false, Some(_)) => {
            return Err(TransitError::InvalidContext(
                "context is only allowed for derived keys",
            ))
        }
        _ => {}
    }

    if let Some(nonce) = ctx.nonce.as_deref() {
        if key.nonce_strategy() != NonceStrategy::Convergent {
            return Err(TransitError::InvalidContext(
                "nonce is only allowed for convergent keys",
            ));
        }
        if nonce.len() != NONCE_LEN {
            return Err(TransitError::InvalidContext("nonce must be 12 bytes"));
        }
    }
    Ok(derivation)
}

fn nonce_array(bytes: &[u8]) -> Result<[u8; NONCE_LEN]> {
    bytes
        .try_into()
        .map_err(|_| TransitError::InvalidContext("nonce must be 12 bytes"))
}

fn associated_data(key: &TransitKey, version: u32) -> String {
    format!("{}:v{version}", key.name())
}
