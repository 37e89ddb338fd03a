//! Shared application state injected into every Axum handler.

use crate::batch::BatchProcessor;
use crate::engine::CryptoEngine;
use crate::keys::KeyStore;

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed, so Axum can clone the state for each request
/// without copying keys.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Single-item operations and the key registry behind them.
    pub engine: CryptoEngine,
    /// Batch operations over the same registry.
    pub batch: BatchProcessor,
}

impl AppState {
    /// Build state around `batch`, sharing its engine for single-item routes.
    pub fn new(batch: BatchProcessor) -> Self {
        Self {
            engine: batch.engine().clone(),
            batch,
        }
    }

    pub fn keys(&self) -> &KeyStore {
        self.engine.store()
    }
}

impl Default for AppState {
    /// Empty key registry with default limits, suitable for tests.
    fn default() -> Self {
        Self::new(BatchProcessor::default())
    }
}
