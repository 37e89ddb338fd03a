//! Multi-item encrypt, decrypt, and rewrap with per-item error isolation.
//!
//! A batch fails as a whole only for structural problems, detected before any
//! item runs: a context list whose length differs from the item list, too many
//! items, or an unknown key. Everything else (a wrong context, a tampered
//! ciphertext, an oversized plaintext) is recorded as an `Err` at the item's
//! index while the remaining items carry on. The engine never escalates
//! per-item errors; callers inspect each entry.
//!
//! Items are split into contiguous chunks that run on Tokio's blocking pool.
//! Results are reassembled in input order, so output index `i` always answers
//! input index `i`.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::engine::{CryptoEngine, TransitContext};
use crate::error::{Result, TransitError};
use crate::keys::TransitKey;

/// Default cap on items per batch request.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default number of chunks a batch is split into.
pub const DEFAULT_WORKERS: usize = 4;

/// Outcome of one batch item.
pub type ItemResult<T> = std::result::Result<T, TransitError>;

type ItemOp<I, O> = fn(&CryptoEngine, &TransitKey, I, &TransitContext) -> ItemResult<O>;

/// Size and parallelism limits for batch requests.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_items: usize,
    pub workers: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Runs batch requests against a [`CryptoEngine`].
#[derive(Clone, Debug, Default)]
pub struct BatchProcessor {
    engine: CryptoEngine,
    limits: BatchLimits,
}

impl BatchProcessor {
    pub fn new(engine: CryptoEngine, limits: BatchLimits) -> Self {
        Self { engine, limits }
    }

    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    /// Encrypt every plaintext; `contexts[i]` (if given) applies to item `i`.
    ///
    /// # Errors
    ///
    /// Whole-batch [`TransitError::InvalidArgument`] or
    /// [`TransitError::KeyNotFound`]; per-item errors are in the returned vector.
    pub async fn encrypt_batch(
        &self,
        key_name: &str,
        plaintexts: Vec<Vec<u8>>,
        contexts: Option<Vec<TransitContext>>,
    ) -> Result<Vec<ItemResult<String>>> {
        self.run(key_name, plaintexts, contexts, |engine, key, plaintext, ctx| {
            engine.encrypt_with(key, &plaintext, ctx)
        })
        .await
    }

    /// Decrypt every envelope; `contexts[i]` (if given) applies to item `i`.
    ///
    /// # Errors
    ///
    /// As [`BatchProcessor::encrypt_batch`].
    pub async fn decrypt_batch(
        &self,
        key_name: &str,
        envelopes: Vec<String>,
        contexts: Option<Vec<TransitContext>>,
    ) -> Result<Vec<ItemResult<Vec<u8>>>> {
        self.run(key_name, envelopes, contexts, |engine, key, envelope, ctx| {
            engine.decrypt_with(key, &envelope, ctx)
        })
        .await
    }

    /// Rewrap every envelope under the latest key version.
    ///
    /// # Errors
    ///
    /// As [`BatchProcessor::encrypt_batch`].
    pub async fn rewrap_batch(
        &self,
        key_name: &str,
        envelopes: Vec<String>,
        contexts: Option<Vec<TransitContext>>,
    ) -> Result<Vec<ItemResult<String>>> {
        self.run(key_name, envelopes, contexts, |engine, key, envelope, ctx| {
            engine.rewrap_with(key, &envelope, ctx)
        })
        .await
    }

    async fn run<I, O>(
        &self,
        key_name: &str,
        inputs: Vec<I>,
        contexts: Option<Vec<TransitContext>>,
        op: ItemOp<I, O>,
    ) -> Result<Vec<ItemResult<O>>>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let items = pair_contexts(inputs, contexts)?;
        if items.len() > self.limits.max_items {
            return Err(TransitError::InvalidArgument(format!(
                "batch too large: {} items (max {})",
                items.len(),
                self.limits.max_items
            )));
        }
        // One snapshot for the whole batch: every item sees the same versions.
        let key = self.engine.store().get_key(key_name)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let chunk_size = total.div_ceil(self.limits.workers.max(1));
        let mut set = JoinSet::new();
        let mut remaining = items.into_iter();
        let mut chunk_count = 0;
        loop {
            let chunk: Vec<(I, TransitContext)> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let engine = self.engine.clone();
            let key = Arc::clone(&key);
            let index = chunk_count;
            set.spawn_blocking(move || {
                let results: Vec<ItemResult<O>> = chunk
                    .into_iter()
                    .map(|(input, ctx)| op(&engine, &key, input, &ctx))
                    .collect();
                (index, results)
            });
            chunk_count += 1;
        }

        let mut chunks: Vec<Option<Vec<ItemResult<O>>>> = (0..chunk_count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (index, results) = joined
                .map_err(|e| TransitError::Internal(format!("batch worker failed: {e}")))?;
            chunks[index] = Some(results);
        }

        let results: Vec<ItemResult<O>> = chunks.into_iter().flatten().flatten().collect();
        debug!(
            key = %key_name,
            items = total,
            failed = results.iter().filter(|r| r.is_err()).count(),
            "batch processed"
        );
        Ok(results)
    }
}

/// Attach contexts to inputs, rejecting a context list of the wrong length.
fn pair_contexts<I>(
    inputs: Vec<I>,
    contexts: Option<Vec<TransitContext>>,
) -> Result<Vec<(I, TransitContext)>> {
    match contexts {
        None => Ok(inputs
            .into_iter()
            .map(|input| (input, TransitContext::empty()))
            .collect()),
        Some(contexts) if contexts.len() != inputs.len() => {
            Err(TransitError::InvalidArgument(format!(
                "{} contexts supplied for {} batch items",
                contexts.len(),
                inputs.len()
            )))
        }
        Some(contexts) => Ok(inputs.into_iter().zip(contexts).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyOptions, KeyStore};
    use crate::engine::EngineLimits;

    async fn processor(options: KeyOptions) -> BatchProcessor {
        let batch = BatchProcessor::default();
        batch.engine().store().create_key("mykey", options).await.unwrap();
        batch
    }

    fn derived() -> KeyOptions {
        KeyOptions {
            derived: true,
            ..KeyOptions::default()
        }
    }

    fn plaintexts(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    fn contexts(items: &[&str]) -> Option<Vec<TransitContext>> {
        Some(items.iter().map(|c| TransitContext::with_context(*c)).collect())
    }

    fn unwrap_all<T>(results: Vec<ItemResult<T>>) -> Vec<T> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn round_trip_without_context() {
        let batch = processor(KeyOptions::default()).await;
        let cts = unwrap_all(
            batch
                .encrypt_batch("mykey", plaintexts(&["one", "two"]), None)
                .await
                .unwrap(),
        );
        let pts = unwrap_all(batch.decrypt_batch("mykey", cts, None).await.unwrap());
        assert_eq!(pts, plaintexts(&["one", "two"]));
    }

    #[tokio::test]
    async fn round_trip_with_matching_contexts() {
        let batch = processor(derived()).await;
        let ctx = contexts(&["oneContext", "twoContext"]);
        let cts = unwrap_all(
            batch
                .encrypt_batch("mykey", plaintexts(&["one", "two"]), ctx.clone())
                .await
                .unwrap(),
        );
        let pts = unwrap_all(batch.decrypt_batch("mykey", cts, ctx).await.unwrap());
        assert_eq!(pts, plaintexts(&["one", "two"]));
    }

    #[tokio::test]
    async fn context_count_mismatch_rejects_whole_batch() {
        let batch = processor(derived()).await;
        let cts = unwrap_all(
            batch
                .encrypt_batch(
                    "mykey",
                    plaintexts(&["one", "two"]),
                    contexts(&["oneContext", "twoContext"]),
                )
                .await
                .unwrap(),
        );
        let err = batch
            .decrypt_batch("mykey", cts, contexts(&["oneContext"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn non_matching_context_fails_only_its_item() {
        let batch = processor(derived()).await;
        let cts = unwrap_all(
            batch
                .encrypt_batch(
                    "mykey",
                    plaintexts(&["one", "two"]),
                    contexts(&["oneContext", "twoContext"]),
                )
                .await
                .unwrap(),
        );
        let results = batch
            .decrypt_batch("mykey", cts, contexts(&["oneContext", "wrongTwoContext"]))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), b"one");
        assert!(matches!(results[1], Err(TransitError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn output_is_index_aligned_across_chunks() {
        let store = KeyStore::default();
        store.create_key("mykey", KeyOptions::default()).await.unwrap();
        let batch = BatchProcessor::new(
            CryptoEngine::new(store, EngineLimits::default()),
            BatchLimits { max_items: 100, workers: 3 },
        );

        let inputs: Vec<Vec<u8>> = (0..37).map(|i| format!("item-{i}").into_bytes()).collect();
        let mut cts = unwrap_all(
            batch.encrypt_batch("mykey", inputs.clone(), None).await.unwrap(),
        );
        cts[5] = "garbage".into();
        cts[20] = "vault:v9:AAAA".into();

        let results = batch.decrypt_batch("mykey", cts, None).await.unwrap();
        assert_eq!(results.len(), inputs.len());
        for (i, result) in results.iter().enumerate() {
            match i {
                5 => assert!(matches!(result, Err(TransitError::MalformedEnvelope(_)))),
                20 => assert!(matches!(result, Err(TransitError::VersionNotFound(9)))),
                _ => assert_eq!(result.as_ref().unwrap(), &inputs[i]),
            }
        }
    }

    #[tokio::test]
    async fn rewrap_batch_upgrades_versions() {
        let batch = processor(KeyOptions::default()).await;
        let cts = unwrap_all(
            batch
                .encrypt_batch("mykey", plaintexts(&["one", "two"]), None)
                .await
                .unwrap(),
        );
        batch.engine().store().rotate("mykey").await.unwrap();
        let rewrapped = unwrap_all(batch.rewrap_batch("mykey", cts, None).await.unwrap());
        assert!(rewrapped.iter().all(|c| c.starts_with("vault:v2:")));
        let pts = unwrap_all(batch.decrypt_batch("mykey", rewrapped, None).await.unwrap());
        assert_eq!(pts, plaintexts(&["one", "two"]));
    }

    #[tokio::test]
    async fn unknown_key_rejects_whole_batch() {
        let batch = BatchProcessor::default();
        let err = batch
            .encrypt_batch("nope", plaintexts(&["one"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn too_many_items_rejects_whole_batch() {
        let store = KeyStore::default();
        store.create_key("mykey", KeyOptions::default()).await.unwrap();
        let batch = BatchProcessor::new(
            CryptoEngine::new(store, EngineLimits::default()),
            BatchLimits { max_items: 2, workers: 1 },
        );
        let err = batch
            .encrypt_batch("mykey", plaintexts(&["a", "b", "c"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let batch = processor(KeyOptions::default()).await;
        assert!(batch
            .encrypt_batch("mykey", Vec::new(), None)
            .await
            .unwrap()
            .is_empty());
    }
}
