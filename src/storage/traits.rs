//! Storage Port Trait Definition
//!
//! A single namespaced key-value port backs the eight persistence
//! namespaces the core needs (Accounts, Network, Permissions, Approvals,
//! Transactions, ChainRegistry, Keyrings, VaultMeta). Implementations:
//! `SqliteStore` (production) and `MemoryStore` (testing, dev harness).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The eight persistence namespaces the core writes through the storage
/// port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Accounts,
    Network,
    Permissions,
    Approvals,
    Transactions,
    ChainRegistry,
    Keyrings,
    VaultMeta,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Accounts => "accounts",
            Namespace::Network => "network",
            Namespace::Permissions => "permissions",
            Namespace::Approvals => "approvals",
            Namespace::Transactions => "transactions",
            Namespace::ChainRegistry => "chain_registry",
            Namespace::Keyrings => "keyrings",
            Namespace::VaultMeta => "vault_meta",
        }
    }
}

/// A single stored record: `{version, updatedAt, payload}` per spec §6.
/// `payload` is an opaque JSON blob; callers serialize/deserialize their own
/// domain type into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: u32,
    pub updated_at: i64,
    pub payload: serde_json::Value,
}

impl StoredRecord {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            version: 1,
            updated_at: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// Abstract namespaced record store. Every write is versioned; invalid
/// records are the caller's responsibility to validate on load (spec §6:
/// drop with a logged warning and a delete call, rather than fail startup).
#[async_trait]
pub trait StoragePort: Send + Sync {
    async fn put(&self, namespace: Namespace, key: &str, record: StoredRecord) -> StorageResult<()>;

    async fn get(&self, namespace: Namespace, key: &str) -> StorageResult<Option<StoredRecord>>;

    async fn get_all(&self, namespace: Namespace) -> StorageResult<Vec<(String, StoredRecord)>>;

    async fn delete(&self, namespace: Namespace, key: &str) -> StorageResult<bool>;
}
