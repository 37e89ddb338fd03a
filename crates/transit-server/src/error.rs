//! Error taxonomy of the transit engine.

use common::ServiceError;
use thiserror::Error;

use crate::crypto::CipherError;

/// Errors produced by key management and encryption operations.
///
/// Messages are safe to return to callers: they never contain key material,
/// plaintext, or derivation context bytes.
#[derive(Debug, Error)]
pub enum TransitError {
    /// No key with this name is registered.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A key with this name already exists.
    #[error("key already exists: {0}")]
    DuplicateKey(String),

    /// The key exists but `deletion_allowed` is false.
    #[error("deletion is not allowed for key: {0}")]
    DeletionNotAllowed(String),

    /// Context or nonce does not fit the key's `derived` / `convergent` flags.
    #[error("invalid context: {0}")]
    InvalidContext(&'static str),

    /// The ciphertext is not a well-formed `vault:v<N>:<payload>` envelope.
    #[error("malformed ciphertext: {0}")]
    MalformedEnvelope(&'static str),

    /// The envelope's version is below the key's minimum decryption version.
    #[error("key version {version} is below the minimum decryption version {min}")]
    VersionTooOld { version: u32, min: u32 },

    /// The envelope names a version newer than the key's latest.
    #[error("key version {0} does not exist")]
    VersionNotFound(u32),

    /// AEAD tag verification failed. Wrong key, wrong context, and tampering
    /// are deliberately indistinguishable.
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// A structurally invalid request (bad name, out-of-range config, batch shape).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A failure that is not the caller's fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransitError {
    /// Stable machine-readable code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TransitError::KeyNotFound(_) => "key_not_found",
            TransitError::DuplicateKey(_) => "duplicate_key",
            TransitError::DeletionNotAllowed(_) => "deletion_not_allowed",
            TransitError::InvalidContext(_) => "invalid_context",
            TransitError::MalformedEnvelope(_) => "malformed_ciphertext",
            TransitError::VersionTooOld { .. } => "version_too_old",
            TransitError::VersionNotFound(_) => "version_not_found",
            TransitError::AuthenticationFailed => "authentication_failed",
            TransitError::InvalidArgument(_) => "invalid_argument",
            TransitError::Internal(_) => "internal",
        }
    }
}

impl From<CipherError> for TransitError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::AeadFailure => TransitError::AuthenticationFailed,
            other => TransitError::Internal(other.to_string()),
        }
    }
}

impl From<TransitError> for ServiceError {
    fn from(err: TransitError) -> Self {
        match err {
            TransitError::Internal(msg) => ServiceError::Internal(msg),
            other => ServiceError::BadRequest(other.to_string()),
        }
    }
}

pub type Result<T, E = TransitError> = std::result::Result<T, E>;
