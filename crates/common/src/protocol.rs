//! Request and response types exchanged over the transit HTTP API.
//!
//! All binary values (plaintext, derivation context, nonce) travel as standard
//! base64 strings. Ciphertexts travel in their `vault:v<N>:<payload>` envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/transit/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    /// Name of the key to create. Immutable once created.
    pub name: String,
    /// Derive a per-context sub-key for every operation.
    #[serde(default)]
    pub derived: bool,
    /// Deterministic encryption; requires `derived`.
    #[serde(default)]
    pub convergent_encryption: bool,
}

/// Request body for `POST /v1/transit/keys/{name}/config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureKeyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_decryption_version: Option<u32>,
}

/// Public view of a transit key. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResponse {
    pub name: String,
    /// Cipher family identifier, e.g. `"aes256-gcm-siv"`.
    #[serde(rename = "type")]
    pub key_type: String,
    pub derived: bool,
    pub convergent_encryption: bool,
    pub deletion_allowed: bool,
    pub min_decryption_version: u32,
    pub latest_version: u32,
    /// Version number → creation time (unix seconds).
    pub keys: BTreeMap<u32, u64>,
}

/// Response body for `GET /v1/transit/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListKeysResponse {
    pub keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// Single-item operations
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/transit/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// Name of the key to encrypt with.
    pub key: String,
    /// Base64 plaintext.
    pub plaintext: String,
    /// Base64 derivation context, for derived keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Base64 12-byte nonce, for convergent keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Request body for `POST /v1/transit/decrypt` and `POST /v1/transit/rewrap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiphertextRequest {
    pub key: String,
    /// `vault:v<N>:<payload>` envelope.
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Response carrying an envelope (encrypt, rewrap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiphertextResponse {
    pub ciphertext: String,
}

/// Response carrying base64 plaintext (decrypt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaintextResponse {
    pub plaintext: String,
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// One plaintext entry of an encrypt batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaintextItem {
    pub plaintext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// One ciphertext entry of a decrypt or rewrap batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiphertextItem {
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Request body for `POST /v1/transit/encrypt/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptBatchRequest {
    pub key: String,
    pub batch: Vec<PlaintextItem>,
}

/// Request body for `POST /v1/transit/decrypt/batch` and `/rewrap/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiphertextBatchRequest {
    pub key: String,
    pub batch: Vec<CiphertextItem>,
}

/// One entry of `batch_results`: exactly one of the value fields or `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    /// A successful entry carrying an envelope.
    pub fn ciphertext(ciphertext: String) -> Self {
        Self {
            ciphertext: Some(ciphertext),
            ..Self::default()
        }
    }

    /// A successful entry carrying base64 plaintext.
    pub fn plaintext(plaintext: String) -> Self {
        Self {
            plaintext: Some(plaintext),
            ..Self::default()
        }
    }

    /// A failed entry.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Whether this entry carries an error marker.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Response body of every batch route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_results: Vec<BatchResult>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.message())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status, always `"ok"` while the server is answering.
    pub status: String,
    /// Number of transit keys currently registered.
    pub keys_loaded: usize,
}
