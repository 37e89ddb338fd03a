//! HMAC-SHA256 derivations: per-context sub-keys and convergent nonces.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::cipher::{CipherError, NONCE_LEN};
use super::material::KeyMaterial;

type HmacSha256 = Hmac<Sha256>;

/// Domain label mixed into convergent nonce derivation so the nonce can never
/// collide with a sub-key computed from the same inputs.
const CONVERGENT_NONCE_LABEL: &[u8] = b"transit-convergent-nonce-v1";

/// Derive the encryption key for `context` from a key version's material.
///
/// One-way: the master material cannot be recovered from any number of
/// sub-keys.
///
/// # Errors
///
/// Returns [`CipherError::DerivationFailure`] if HMAC cannot be keyed.
pub fn derive_subkey(master: &KeyMaterial, context: &[u8]) -> Result<KeyMaterial, CipherError> {
    let mut mac =
        HmacSha256::new_from_slice(master.as_bytes()).map_err(|_| CipherError::DerivationFailure)?;
    mac.update(context);
    KeyMaterial::from_slice(&mac.finalize().into_bytes())
}

/// Deterministic nonce for convergent encryption.
///
/// Keyed by the context-derived sub-key, so identical plaintext under an
/// identical context and key version always yields the same nonce.
///
/// # Errors
///
/// Returns [`CipherError::DerivationFailure`] if HMAC cannot be keyed.
pub fn convergent_nonce(
    subkey: &KeyMaterial,
    plaintext: &[u8],
) -> Result<[u8; NONCE_LEN], CipherError> {
    let mut mac =
        HmacSha256::new_from_slice(subkey.as_bytes()).map_err(|_| CipherError::DerivationFailure)?;
    mac.update(CONVERGENT_NONCE_LABEL);
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    Ok(nonce)
}
