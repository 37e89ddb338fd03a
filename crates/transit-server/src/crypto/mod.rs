//! AES-256-GCM-SIV primitives and HMAC-SHA256 derivations.
//!
//! This module is intentionally free of key-registry and HTTP dependencies.
//! It provides the low-level operations the transit engine composes:
//!
//! - [`cipher`]: seal/open with associated data, random nonces.
//! - [`derive`]: per-context sub-keys and convergent nonces.
//! - [`material`]: the zeroed-on-drop key buffer.

pub mod cipher;
pub mod derive;
pub mod material;

pub use cipher::{CipherError, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use material::KeyMaterial;
