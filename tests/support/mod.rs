use identirust::{
    ContactSummary, IdentifyRequest, Identirust, MemoryStore, PersistentContactStore,
    RetryConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

/// One store backend under test. The temp dir lives as long as the backend.
pub struct Backend {
    pub name: &'static str,
    pub service: Identirust,
    _dir: Option<TempDir>,
}

impl Backend {
    #[allow(dead_code)]
    pub fn identify(&self, email: Option<&str>, phone: Option<&str>) -> ContactSummary {
        self.service
            .identify(IdentifyRequest::new(email, phone))
            .unwrap_or_else(|err| panic!("[{}] identify failed: {err}", self.name))
            .contact
    }

    #[allow(dead_code)]
    pub fn contact_count(&self) -> usize {
        self.service.store().scan().unwrap().len()
    }
}

/// A memory backend and a RocksDB backend, each empty.
#[allow(dead_code)]
pub fn backends() -> Vec<Backend> {
    let dir = tempfile::tempdir().unwrap();
    let persistent = PersistentContactStore::open(dir.path().join("contacts")).unwrap();
    vec![
        Backend {
            name: "memory",
            service: Identirust::with_shared_store(
                Arc::new(MemoryStore::new()),
                RetryConfig::no_backoff(16),
            ),
            _dir: None,
        },
        Backend {
            name: "rocksdb",
            service: Identirust::with_shared_store(
                Arc::new(persistent),
                RetryConfig::no_backoff(16),
            ),
            _dir: Some(dir),
        },
    ]
}
