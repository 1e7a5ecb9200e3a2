//! In-memory Storage Port
//!
//! Backs the dev harness and controller unit tests. Data is lost on
//! restart. Thread-safe via `Arc<RwLock<..>>`, one map per namespace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{Namespace, StoragePort, StorageResult, StoredRecord};

/// In-memory namespaced record store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<(&'static str, String), StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoragePort for MemoryStore {
    async fn put(&self, namespace: Namespace, key: &str, record: StoredRecord) -> StorageResult<()> {
        let mut records = self.records.write().await;
        records.insert((namespace.as_str(), key.to_string()), record);
        Ok(())
    }

    async fn get(&self, namespace: Namespace, key: &str) -> StorageResult<Option<StoredRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(namespace.as_str(), key.to_string())).cloned())
    }

    async fn get_all(&self, namespace: Namespace) -> StorageResult<Vec<(String, StoredRecord)>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((ns, _), _)| *ns == namespace.as_str())
            .map(|((_, key), record)| (key.clone(), record.clone()))
            .collect())
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> StorageResult<bool> {
        let mut records = self.records.write().await;
        Ok(records.remove(&(namespace.as_str(), key.to_string())).is_some())
    }
}
