//! # Identirust
//!
//! Identity reconciliation over a transactional contact store.
//!
//! Each observed `(email, phoneNumber)` pair is linked to every stored contact that
//! shares either value. Linked contacts form one identity, owned by its oldest
//! primary. Merges, demotions and new secondaries are applied atomically and retried
//! when a concurrent request wins the race.

pub mod audit;
pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod linker;
pub mod model;
pub mod persistence;
pub mod store;
pub mod test_support;
pub mod view;

// Re-export main types for convenience
pub use audit::{AuditReport, LinkViolation};
pub use config::{IdentiConfig, RetryConfig, StorageBackend};
pub use error::{IdentifyError, StoreError};
pub use linker::Resolution;
pub use model::{
    Contact, ContactId, ContactSummary, IdentifyRequest, IdentifyResponse, LinkPrecedence,
    Observation,
};
pub use persistence::PersistentContactStore;
pub use store::{ContactStore, ContactTransaction, MemoryStore, StoreMetrics};

use std::sync::Arc;

/// Main API for identity reconciliation.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Identirust {
    store: Arc<dyn ContactStore>,
    retry: RetryConfig,
}

impl Identirust {
    /// Create an instance over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Create an instance over the given store with the default retry policy.
    pub fn with_store(store: impl ContactStore + 'static) -> Self {
        Self::with_shared_store(Arc::new(store), RetryConfig::default())
    }

    pub fn with_shared_store(store: Arc<dyn ContactStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Open the store described by `config`.
    pub fn from_config(config: &IdentiConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn ContactStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Rocksdb => {
                Arc::new(PersistentContactStore::open(&config.storage.data_dir)?)
            }
        };
        Ok(Self::with_shared_store(store, config.retry.clone()))
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Validate a request body and resolve it.
    pub fn identify(&self, request: IdentifyRequest) -> Result<IdentifyResponse, IdentifyError> {
        let observation = request.into_observation()?;
        let resolution = self.identify_observation(&observation)?;
        Ok(IdentifyResponse {
            contact: resolution.summary,
        })
    }

    /// Resolve an already validated observation.
    pub fn identify_observation(
        &self,
        observation: &Observation,
    ) -> Result<Resolution, IdentifyError> {
        linker::identify(self.store.as_ref(), observation, &self.retry)
    }

    /// Check the committed contacts against the linking invariants.
    pub fn audit(&self) -> Result<AuditReport, StoreError> {
        audit::audit_store(self.store.as_ref())
    }

    pub fn metrics(&self) -> Option<StoreMetrics> {
        self.store.metrics()
    }
}

impl Default for Identirust {
    fn default() -> Self {
        Self::new()
    }
}
