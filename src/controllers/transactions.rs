//! Transactions controller
//!
//! Owns [`TransactionRecord`]s through their forced pipeline ordering.
//! Receipt polling uses exponential backoff (`base`/`cap`/`max_attempts`
//! from [`crate::config::ReceiptPollConfig`]); on exhaustion the record is
//! marked `failed` with `ReceiptTimeout`. `resume_pending` at startup
//! continues every non-terminal record from its recorded status without
//! re-queueing on the messenger.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::common::error::{Result, WalletError};
use crate::config::ReceiptPollConfig;
use crate::messenger::Messenger;
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::{TransactionRecord, TransactionStatus};

pub struct TransactionsController {
    records: RwLock<HashMap<Uuid, TransactionRecord>>,
    storage: Arc<dyn StoragePort>,
    messenger: Messenger,
    receipt_poll: ReceiptPollConfig,
}

impl TransactionsController {
    pub fn new(storage: Arc<dyn StoragePort>, messenger: Messenger, receipt_poll: ReceiptPollConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            storage,
            messenger,
            receipt_poll,
        }
    }

    /// Load every persisted record into memory. Call sites drive
    /// non-terminal ones forward from their recorded status; this method
    /// performs no network I/O itself.
    pub async fn resume_pending(&self) -> Result<Vec<TransactionRecord>> {
        let rows = self
            .storage
            .get_all(Namespace::Transactions)
            .await
            .map_err(|e| WalletError::storage(e.to_string()))?;

        let mut records = self.records.write().await;
        let mut resumed = Vec::new();
        for (_, record) in rows {
            if let Ok(tx) = serde_json::from_value::<TransactionRecord>(record.payload) {
                if !tx.status.is_terminal() {
                    resumed.push(tx.clone());
                }
                records.insert(tx.id, tx);
            }
        }
        Ok(resumed)
    }

    pub async fn create(&self, record: TransactionRecord) -> Result<()> {
        self.persist(&record).await?;
        self.records.write().await.insert(record.id, record);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<TransactionRecord> {
        self.records.read().await.get(&id).cloned()
    }

    async fn persist(&self, record: &TransactionRecord) -> Result<()> {
        let value = serde_json::to_value(record).map_err(|e| WalletError::internal(e.to_string()))?;
        self.storage
            .put(Namespace::Transactions, &record.id.to_string(), StoredRecord::new(value))
            .await
            .map_err(|e| WalletError::storage(e.to_string()))
    }

    async fn mutate(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut TransactionRecord) -> std::result::Result<(), String>,
    ) -> Result<TransactionRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| WalletError::internal(format!("unknown transaction {}", id)))?;
        f(record).map_err(WalletError::internal)?;
        let snapshot = record.clone();
        drop(records);
        self.persist(&snapshot).await?;
        self.messenger.publish(
            "transactions.changed",
            serde_json::json!({ "id": id.to_string(), "status": snapshot.status.to_string() }),
        );
        Ok(snapshot)
    }

    pub async fn mark_approved(&self, id: Uuid) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.transition(TransactionStatus::Approved)).await
    }

    pub async fn mark_signed(&self, id: Uuid) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.mark_signed()).await
    }

    pub async fn mark_broadcast(&self, id: Uuid, hash: String) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.mark_broadcast(hash)).await
    }

    pub async fn mark_confirmed(&self, id: Uuid, receipt: serde_json::Value) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.mark_confirmed(receipt)).await
    }

    pub async fn mark_failed(&self, id: Uuid, error: String) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.mark_failed(error)).await
    }

    pub async fn mark_rejected(&self, id: Uuid) -> Result<TransactionRecord> {
        self.mutate(id, |tx| tx.mark_rejected()).await
    }

    /// The delay before the next receipt-poll attempt, or `None` once
    /// `max_attempts` has been exhausted (caller should then call
    /// `mark_failed` with `ReceiptTimeout`).
    pub fn next_poll_delay_ms(&self, attempt: u32) -> Option<u64> {
        if attempt >= self.receipt_poll.max_attempts {
            return None;
        }
        let backoff = self.receipt_poll.base_ms.saturating_mul(1u64 << attempt.min(20));
        Some(backoff.min(self.receipt_poll.cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::ChainRef;

    fn controller() -> TransactionsController {
        TransactionsController::new(
            Arc::new(MemoryStore::new()),
            Messenger::new(16),
            ReceiptPollConfig::default(),
        )
    }

    #[tokio::test]
    async fn pipeline_advances_through_whitelisted_transitions() {
        let controller = controller();
        let record = TransactionRecord::new(
            "eip155",
            ChainRef::parse("eip155:1").unwrap(),
            "https://dapp.example",
            "0xabc",
            serde_json::json!({}),
        );
        let id = record.id;
        controller.create(record).await.unwrap();

        controller.mark_approved(id).await.unwrap();
        controller.mark_signed(id).await.unwrap();
        let broadcast = controller.mark_broadcast(id, "0xdead".to_string()).await.unwrap();
        assert_eq!(broadcast.status, TransactionStatus::Broadcast);

        let confirmed = controller
            .mark_confirmed(id, serde_json::json!({"status": "0x1"}))
            .await
            .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn resume_pending_returns_only_non_terminal_records() {
        let controller = controller();
        let pending = TransactionRecord::new(
            "eip155",
            ChainRef::parse("eip155:1").unwrap(),
            "https://dapp.example",
            "0xabc",
            serde_json::json!({}),
        );
        let mut done = TransactionRecord::new(
            "eip155",
            ChainRef::parse("eip155:1").unwrap(),
            "https://dapp.example",
            "0xabc",
            serde_json::json!({}),
        );
        done.mark_failed("boom").unwrap();

        controller.create(pending.clone()).await.unwrap();
        controller.create(done).await.unwrap();

        let resumed = controller.resume_pending().await.unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].id, pending.id);
    }

    #[test]
    fn poll_delay_backs_off_and_caps_then_exhausts() {
        let controller = controller();
        assert_eq!(controller.next_poll_delay_ms(0), Some(3_000));
        assert_eq!(controller.next_poll_delay_ms(1), Some(6_000));
        assert_eq!(controller.next_poll_delay_ms(10), Some(30_000));
        assert_eq!(controller.next_poll_delay_ms(20), None);
    }
}
