//! Key version policy: rotation and the minimum decryption version.

use tracing::info;

use super::{KeyMetadata, KeyStore, KeyVersion, TransitKey};
use crate::error::{Result, TransitError};

impl TransitKey {
    /// Version number used for every new encryption.
    pub fn latest_version(&self) -> u32 {
        self.latest().version
    }

    /// The version used for every new encryption.
    pub(crate) fn latest(&self) -> &KeyVersion {
        // A key is created with version 1 and versions are never removed.
        &self.versions[self.versions.len() - 1]
    }

    /// Resolve `version` for decryption, enforcing `min_decryption_version`.
    ///
    /// # Errors
    ///
    /// - [`TransitError::VersionTooOld`] if `version < min_decryption_version`.
    /// - [`TransitError::VersionNotFound`] if `version` is newer than the latest.
    pub(crate) fn version_for_decrypt(&self, version: u32) -> Result<&KeyVersion> {
        if version < self.min_decryption_version {
            return Err(TransitError::VersionTooOld {
                version,
                min: self.min_decryption_version,
            });
        }
        let index = usize::try_from(version)
            .ok()
            .and_then(|v| v.checked_sub(1))
            .ok_or(TransitError::VersionNotFound(version))?;
        self.versions
            .get(index)
            .ok_or(TransitError::VersionNotFound(version))
    }

    /// Copy of this key with `version` appended as the new latest.
    ///
    /// `min_decryption_version` is carried over unchanged, so every earlier
    /// version stays decryptable.
    fn with_version(&self, version: KeyVersion) -> Self {
        let mut next = self.clone();
        next.versions.push(version);
        next
    }
}

impl KeyStore {
    /// Append a new version with fresh key material.
    ///
    /// Returns the metadata of the snapshot this rotation published.
    ///
    /// # Errors
    ///
    /// Returns [`TransitError::KeyNotFound`] if `name` is not registered.
    pub async fn rotate(&self, name: &str) -> Result<KeyMetadata> {
        let updated = self
            .update(name, |key| {
                let version = key.latest_version() + 1;
                Ok(key.with_version(KeyVersion::new(version, self.source().generate())))
            })
            .await?;

        info!(key = %name, version = updated.latest_version(), "transit key rotated");
        Ok(updated.metadata())
    }
}
