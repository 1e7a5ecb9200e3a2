//! SQLite Persistent Storage Port
//!
//! Durable storage for every persistence namespace, surviving process
//! restarts. Uses connection pooling via r2d2 for concurrent access. All
//! namespaces share one `records` table keyed by `(namespace, key)`.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{Namespace, StoragePort, StorageError, StorageResult, StoredRecord};

/// SQLite-backed storage port with connection pooling.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a database at `db_path`, running migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_records_namespace ON records(namespace);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(String, StoredRecord)> {
        let key: String = row.get("key")?;
        let version: i64 = row.get("version")?;
        let updated_at: i64 = row.get("updated_at")?;
        let payload_text: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);

        Ok((
            key,
            StoredRecord {
                version: version as u32,
                updated_at,
                payload,
            },
        ))
    }

    fn put_sync(&self, namespace: Namespace, key: &str, record: &StoredRecord) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let payload_text = serde_json::to_string(&record.payload)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO records (namespace, key, version, updated_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(namespace, key) DO UPDATE SET
                version = excluded.version,
                updated_at = excluded.updated_at,
                payload = excluded.payload
            "#,
            params![namespace.as_str(), key, record.version, record.updated_at, payload_text],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_sync(&self, namespace: Namespace, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let conn = self.conn()?;

        let record = conn
            .query_row(
                "SELECT * FROM records WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| Self::row_to_record(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .map(|(_, record)| record);

        Ok(record)
    }

    fn get_all_sync(&self, namespace: Namespace) -> Result<Vec<(String, StoredRecord)>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM records WHERE namespace = ?1 ORDER BY key ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map(params![namespace.as_str()], |row| Self::row_to_record(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }

    fn delete_sync(&self, namespace: Namespace, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                "DELETE FROM records WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected > 0)
    }
}

#[async_trait]
impl StoragePort for SqliteStore {
    async fn put(&self, namespace: Namespace, key: &str, record: StoredRecord) -> StorageResult<()> {
        self.put_sync(namespace, key, &record)
    }

    async fn get(&self, namespace: Namespace, key: &str) -> StorageResult<Option<StoredRecord>> {
        self.get_sync(namespace, key)
    }

    async fn get_all(&self, namespace: Namespace) -> StorageResult<Vec<(String, StoredRecord)>> {
        self.get_all_sync(namespace)
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> StorageResult<bool> {
        self.delete_sync(namespace, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = SqliteStore::in_memory().unwrap();
        let record = StoredRecord::new(serde_json::json!({"keyring_id": "abc"}));

        store.put(Namespace::Keyrings, "k1", record).await.unwrap();

        let fetched = store.get(Namespace::Keyrings, "k1").await.unwrap().unwrap();
        assert_eq!(fetched.payload["keyring_id"], "abc");
    }

    #[tokio::test]
    async fn put_upserts_on_conflict() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Namespace::Network, "eip155:1", StoredRecord::new(serde_json::json!({"v": 1})))
            .await
            .unwrap();
        store
            .put(Namespace::Network, "eip155:1", StoredRecord::new(serde_json::json!({"v": 2})))
            .await
            .unwrap();

        let all = store.get_all(Namespace::Network).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.payload["v"], 2);
    }

    #[tokio::test]
    async fn delete_returns_whether_a_row_was_removed() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put(Namespace::Transactions, "tx1", StoredRecord::new(serde_json::json!({})))
            .await
            .unwrap();

        assert!(store.delete(Namespace::Transactions, "tx1").await.unwrap());
        assert!(!store.delete(Namespace::Transactions, "tx1").await.unwrap());
    }
}
