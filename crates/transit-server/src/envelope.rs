//! Versioned ciphertext wire format.
//!
//! ```text
//! vault:v<version>:<base64(nonce || ciphertext || tag)>
//! ```
//!
//! The version segment names the key version that sealed the payload, which
//! lets old ciphertext keep decrypting after rotation and lets `rewrap`
//! upgrade it.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Result, TransitError};

/// Prefix that appears at the start of every envelope, up to the version number.
pub const ENVELOPE_PREFIX: &str = "vault:v";

/// Encode a sealed payload under `version`.
pub fn encode(version: u32, payload: &[u8]) -> String {
    format!("{ENVELOPE_PREFIX}{version}:{}", STANDARD.encode(payload))
}

/// Split an envelope into its version and raw payload bytes.
///
/// # Errors
///
/// Returns [`TransitError::MalformedEnvelope`] if the prefix or separator is
/// missing, the version is not a positive integer, or the payload is not
/// valid base64.
pub fn decode(envelope: &str) -> Result<(u32, Vec<u8>)> {
    let rest = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or(TransitError::MalformedEnvelope("missing vault:v prefix"))?;
    let (version, payload) = rest
        .split_once(':')
        .ok_or(TransitError::MalformedEnvelope("missing version separator"))?;

    let version: u32 = version
        .parse()
        .map_err(|_| TransitError::MalformedEnvelope("version is not a number"))?;
    if version == 0 {
        return Err(TransitError::MalformedEnvelope("version must be at least 1"));
    }

    let payload = STANDARD
        .decode(payload)
        .map_err(|_| TransitError::MalformedEnvelope("payload is not valid base64"))?;
    Ok((version, payload))
}
