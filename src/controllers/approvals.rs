//! Approvals controller
//!
//! Queues [`ApprovalTask`]s awaiting a UI decision. `request_approval`
//! returns a future that resolves once `resolve`/`reject` is called for
//! that task id; at most one resolution is accepted per id. The queue
//! lives in memory only — a persisted snapshot is best-effort for
//! cross-restart recovery and is cleared on lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::common::error::{Result, WalletError};
use crate::messenger::Messenger;
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::ApprovalTask;

struct PendingEntry {
    task: ApprovalTask,
    responder: oneshot::Sender<Result<serde_json::Value>>,
}

pub struct ApprovalsController {
    pending: RwLock<HashMap<Uuid, PendingEntry>>,
    storage: Arc<dyn StoragePort>,
    messenger: Messenger,
}

impl ApprovalsController {
    pub fn new(storage: Arc<dyn StoragePort>, messenger: Messenger) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            storage,
            messenger,
        }
    }

    /// Enqueue `task`, publish `attention:requested`, and return a
    /// receiver that resolves when a UI decision arrives.
    pub async fn request_approval(
        &self,
        task: ApprovalTask,
    ) -> oneshot::Receiver<Result<serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        let id = task.id;

        let snapshot_value = serde_json::to_value(&task).ok();
        self.pending.write().await.insert(
            id,
            PendingEntry {
                task,
                responder: tx,
            },
        );
        if let Some(value) = snapshot_value {
            let _ = self
                .storage
                .put(Namespace::Approvals, &id.to_string(), StoredRecord::new(value))
                .await;
        }

        self.messenger
            .publish("approvals.attention_requested", serde_json::json!({ "id": id.to_string() }));
        rx
    }

    pub async fn list_pending(&self) -> Vec<ApprovalTask> {
        self.pending.read().await.values().map(|e| e.task.clone()).collect()
    }

    pub async fn resolve(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        let entry = self
            .pending
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| WalletError::ApprovalNotFound(id.to_string()))?;
        let _ = self.storage.delete(Namespace::Approvals, &id.to_string()).await;
        entry
            .responder
            .send(Ok(result))
            .map_err(|_| WalletError::internal("approval receiver dropped"))
    }

    pub async fn reject(&self, id: Uuid, error: WalletError) -> Result<()> {
        let entry = self
            .pending
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| WalletError::ApprovalNotFound(id.to_string()))?;
        let _ = self.storage.delete(Namespace::Approvals, &id.to_string()).await;
        entry
            .responder
            .send(Err(error))
            .map_err(|_| WalletError::internal("approval receiver dropped"))
    }

    /// Reject every pending task originating from `port_id`/`session_id`
    /// with `Rejected`, used on port disconnect or session rotation.
    pub async fn expire_pending_by_request_context(&self, port_id: u64, session_id: &str) {
        let mut pending = self.pending.write().await;
        let matching: Vec<Uuid> = pending
            .iter()
            .filter(|(_, entry)| {
                entry
                    .task
                    .request_context
                    .as_ref()
                    .map(|ctx| ctx.port_id == port_id && ctx.session_id == session_id)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in matching {
            if let Some(entry) = pending.remove(&id) {
                let _ = self.storage.delete(Namespace::Approvals, &id.to_string()).await;
                let _ = entry.responder.send(Err(WalletError::Rejected));
            }
        }
    }

    /// Clear the in-memory queue on lock, rejecting everything pending.
    pub async fn clear_on_lock(&self) {
        let mut pending = self.pending.write().await;
        for (id, entry) in pending.drain() {
            let _ = self.storage.delete(Namespace::Approvals, &id.to_string()).await;
            let _ = entry.responder.send(Err(WalletError::Locked));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{ApprovalType, RequestContext};

    fn task(port_id: u64, session_id: &str) -> ApprovalTask {
        ApprovalTask {
            id: Uuid::new_v4(),
            task_type: ApprovalType::SignMessage,
            origin: "https://dapp.example".to_string(),
            namespace: Some("eip155".to_string()),
            chain_ref: None,
            payload: serde_json::json!({}),
            created_at: 0,
            request_context: Some(RequestContext {
                port_id,
                session_id: session_id.to_string(),
                request_id: "r1".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn resolve_completes_the_waiting_receiver() {
        let controller = ApprovalsController::new(Arc::new(MemoryStore::new()), Messenger::new(16));
        let t = task(1, "s1");
        let id = t.id;
        let rx = controller.request_approval(t).await;

        controller.resolve(id, serde_json::json!({"signature": "0x1"})).await.unwrap();
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["signature"], "0x1");
    }

    #[tokio::test]
    async fn double_resolve_fails_with_approval_not_found() {
        let controller = ApprovalsController::new(Arc::new(MemoryStore::new()), Messenger::new(16));
        let t = task(1, "s1");
        let id = t.id;
        let _rx = controller.request_approval(t).await;

        controller.resolve(id, serde_json::json!({})).await.unwrap();
        assert!(matches!(
            controller.resolve(id, serde_json::json!({})).await,
            Err(WalletError::ApprovalNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expire_pending_by_request_context_only_matches_same_port_and_session() {
        let controller = ApprovalsController::new(Arc::new(MemoryStore::new()), Messenger::new(16));
        let rx1 = controller.request_approval(task(1, "s1")).await;
        let rx2 = controller.request_approval(task(2, "s2")).await;

        controller.expire_pending_by_request_context(1, "s1").await;

        assert!(matches!(rx1.await.unwrap(), Err(WalletError::Rejected)));
        assert_eq!(controller.list_pending().await.len(), 1);
        drop(rx2);
    }
}
