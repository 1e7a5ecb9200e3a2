//! Storage Port Module
//!
//! Provides persistence for the eight namespaces the core writes through:
//! Accounts, Network, Permissions, Approvals, Transactions, ChainRegistry,
//! Keyrings, VaultMeta.
//!
//! This module contains:
//! - The `StoragePort` trait definition
//! - A SQLite implementation for production / the standalone dev binary
//! - An in-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Namespace, StoragePort, StorageError, StorageResult, StoredRecord};
