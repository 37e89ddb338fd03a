//! [`KeyStore`]: shared, lock-free-read registry of transit keys.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::info;

use super::{validate_key_name, KeyConfig, KeyMetadata, KeyOptions, KeySource, OsKeySource, TransitKey};
use crate::error::{Result, TransitError};

type KeyMap = HashMap<String, Arc<TransitKey>>;

/// Registry of named transit keys.
///
/// Backed by [`ArcSwap`] so the encryption hot path never blocks: readers load
/// the current map and clone an `Arc<TransitKey>` snapshot. Writers are
/// serialised by an async mutex, build a new map, and publish it with a single
/// atomic store. A reader therefore observes a key either entirely before or
/// entirely after a create, rotation, configuration change, or deletion, and a
/// completed write is visible to every later read.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<ArcSwap<KeyMap>>,
    writer: Arc<Mutex<()>>,
    source: Arc<dyn KeySource>,
}

impl KeyStore {
    /// Create an empty store that draws key material from `source`.
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            writer: Arc::new(Mutex::new(())),
            source,
        }
    }

    /// Return the number of keys currently registered.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Register a new key with version 1.
    ///
    /// # Errors
    ///
    /// - [`TransitError::InvalidArgument`] for an invalid name, or
    ///   `convergent_encryption` requested without `derived`.
    /// - [`TransitError::DuplicateKey`] if the name is already taken.
    pub async fn create_key(&self, name: &str, options: KeyOptions) -> Result<KeyMetadata> {
        validate_key_name(name)?;
        if options.convergent_encryption && !options.derived {
            return Err(TransitError::InvalidArgument(
                "convergent encryption requires a derived key".into(),
            ));
        }

        let _guard = self.writer.lock().await;
        let current = self.inner.load_full();
        if current.contains_key(name) {
            return Err(TransitError::DuplicateKey(name.to_owned()));
        }

        let key = Arc::new(TransitKey::new(name.to_owned(), options, self.source.generate()));
        let meta = key.metadata();
        let mut next = (*current).clone();
        next.insert(name.to_owned(), key);
        self.inner.store(Arc::new(next));

        info!(
            key = %name,
            derived = options.derived,
            convergent = options.convergent_encryption,
            "transit key created"
        );
        Ok(meta)
    }

    /// Snapshot of a key, used by every cryptographic operation.
    ///
    /// This is a lock-free read; safe to call on the hot encryption path.
    ///
    /// # Errors
    ///
    /// Returns [`TransitError::KeyNotFound`] if `name` is not registered.
    pub fn get_key(&self, name: &str) -> Result<Arc<TransitKey>> {
        self.inner
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| TransitError::KeyNotFound(name.to_owned()))
    }

    /// Read-only lookup; an absent key is `None`, not an error.
    pub fn metadata(&self, name: &str) -> Option<KeyMetadata> {
        self.inner.load().get(name).map(|k| k.metadata())
    }

    /// Names of all registered keys, sorted.
    pub fn list_key_names(&self) -> BTreeSet<String> {
        self.inner.load().keys().cloned().collect()
    }

    /// Toggle `deletion_allowed` and/or move `min_decryption_version`.
    ///
    /// # Errors
    ///
    /// - [`TransitError::KeyNotFound`] if `name` is not registered.
    /// - [`TransitError::InvalidArgument`] if the minimum version is out of range.
    pub async fn configure_key(&self, name: &str, config: KeyConfig) -> Result<KeyMetadata> {
        let updated = self.update(name, |key| key.with_config(config)).await?;
        info!(
            key = %name,
            deletion_allowed = updated.deletion_allowed(),
            min_decryption_version = updated.min_decryption_version(),
            "transit key configured"
        );
        Ok(updated.metadata())
    }

    /// Remove a key and all of its versions.
    ///
    /// # Errors
    ///
    /// - [`TransitError::KeyNotFound`] if `name` is not registered.
    /// - [`TransitError::DeletionNotAllowed`] unless `deletion_allowed` is set.
    pub async fn delete_key(&self, name: &str) -> Result<()> {
        let _guard = self.writer.lock().await;
        let current = self.inner.load_full();
        let key = current
            .get(name)
            .ok_or_else(|| TransitError::KeyNotFound(name.to_owned()))?;
        if !key.deletion_allowed() {
            return Err(TransitError::DeletionNotAllowed(name.to_owned()));
        }

        let mut next = (*current).clone();
        next.remove(name);
        self.inner.store(Arc::new(next));

        info!(key = %name, "transit key deleted");
        Ok(())
    }

    /// Replace one key with `f(current)` under the writer lock.
    pub(super) async fn update<F>(&self, name: &str, f: F) -> Result<Arc<TransitKey>>
    where
        F: FnOnce(&TransitKey) -> Result<TransitKey>,
    {
        let _guard = self.writer.lock().await;
        let current = self.inner.load_full();
        let key = current
            .get(name)
            .ok_or_else(|| TransitError::KeyNotFound(name.to_owned()))?;

        let updated = Arc::new(f(key)?);
        let mut next = (*current).clone();
        next.insert(name.to_owned(), Arc::clone(&updated));
        self.inner.store(Arc::new(next));
        Ok(updated)
    }

    pub(super) fn source(&self) -> &dyn KeySource {
        self.source.as_ref()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(Arc::new(OsKeySource))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore").field("keys", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyMaterial, KEY_LEN};
    use crate::keys::MockKeySource;

    #[tokio::test]
    async fn initially_empty() {
        let store = KeyStore::default();
        assert_eq!(store.len(), 0);
        assert!(store.list_key_names().is_empty());
        assert!(matches!(
            store.get_key("mykey"),
            Err(TransitError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = KeyStore::default();
        let meta = store.create_key("mykey", KeyOptions::default()).await.unwrap();
        assert_eq!(meta.latest_version, 1);
        assert_eq!(store.len(), 1);
        assert!(store.list_key_names().contains("mykey"));
        assert_eq!(store.get_key("mykey").unwrap().name(), "mykey");
    }

    #[tokio::test]
    async fn create_existing_key_is_rejected() {
        let store = KeyStore::default();
        store.create_key("mykey", KeyOptions::default()).await.unwrap();
        let err = store
            .create_key("mykey", KeyOptions { derived: true, ..KeyOptions::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::DuplicateKey(_)));
        // The original key was not silently updated.
        assert!(!store.get_key("mykey").unwrap().is_derived());
    }

    #[tokio::test]
    async fn convergent_requires_derived() {
        let store = KeyStore::default();
        let err = store
            .create_key(
                "mykey",
                KeyOptions { convergent_encryption: true, ..KeyOptions::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::InvalidArgument(_)));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn missing_key_metadata_is_none() {
        let store = KeyStore::default();
        assert!(store.metadata("hello-world").is_none());
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_found() {
        let store = KeyStore::default();
        let err = store.delete_key("hello-world").await.unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn delete_requires_deletion_allowed() {
        let store = KeyStore::default();
        store.create_key("mykey", KeyOptions::default()).await.unwrap();
        let err = store.delete_key("mykey").await.unwrap_err();
        assert!(matches!(err, TransitError::DeletionNotAllowed(_)));

        store
            .configure_key(
                "mykey",
                KeyConfig { deletion_allowed: Some(true), ..KeyConfig::default() },
            )
            .await
            .unwrap();
        store.delete_key("mykey").await.unwrap();
        assert!(store.metadata("mykey").is_none());
    }

    #[tokio::test]
    async fn configure_missing_key_is_not_found() {
        let store = KeyStore::default();
        let err = store
            .configure_key("nope", KeyConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_writes() {
        let store = KeyStore::default();
        store.create_key("mykey", KeyOptions::default()).await.unwrap();
        let before = store.get_key("mykey").unwrap();
        store
            .configure_key(
                "mykey",
                KeyConfig { deletion_allowed: Some(true), ..KeyConfig::default() },
            )
            .await
            .unwrap();
        assert!(!before.deletion_allowed());
        assert!(store.get_key("mykey").unwrap().deletion_allowed());
    }

    #[tokio::test]
    async fn key_material_comes_from_source() {
        let mut source = MockKeySource::new();
        source
            .expect_generate()
            .times(1)
            .returning(|| KeyMaterial::from_slice(&[0x11; KEY_LEN]).unwrap());
        let store = KeyStore::new(Arc::new(source));
        store.create_key("mykey", KeyOptions::default()).await.unwrap();

        let key = store.get_key("mykey").unwrap();
        assert_eq!(key.latest().material().as_bytes(), &[0x11; KEY_LEN]);
    }

    #[tokio::test]
    async fn concurrent_creates_of_one_name_admit_exactly_one() {
        let store = KeyStore::default();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_key("race", KeyOptions::default()).await.is_ok()
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
