//! Permissions controller
//!
//! Owns one [`PermissionRecord`] per `(origin, namespace)`. The capability
//! domain is closed (`Basic`, `Accounts`, `Sign`, `Transaction`); an
//! `Accounts` grant is legal only once `account_ids` is non-empty.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::common::error::{Result, WalletError};
use crate::messenger::Messenger;
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::{Capability, ChainRef, Grant, PermissionRecord};

fn key(origin: &str, namespace: &str) -> String {
    format!("{}::{}", origin, namespace)
}

pub struct PermissionsController {
    records: RwLock<HashMap<String, PermissionRecord>>,
    storage: Arc<dyn StoragePort>,
    messenger: Messenger,
}

impl PermissionsController {
    pub fn new(storage: Arc<dyn StoragePort>, messenger: Messenger) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            storage,
            messenger,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let rows = self
            .storage
            .get_all(Namespace::Permissions)
            .await
            .map_err(|e| WalletError::storage(e.to_string()))?;
        let mut records = self.records.write().await;
        for (key, record) in rows {
            match serde_json::from_value::<PermissionRecord>(record.payload) {
                Ok(permission) => {
                    records.insert(key, permission);
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "dropping unreadable permission record");
                    self.storage.delete(Namespace::Permissions, &key).await.ok();
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, origin: &str, namespace: &str) -> Option<PermissionRecord> {
        self.records.read().await.get(&key(origin, namespace)).cloned()
    }

    pub async fn list(&self) -> Vec<PermissionRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn is_connected(&self, origin: &str, namespace: &str) -> bool {
        self.records
            .read()
            .await
            .get(&key(origin, namespace))
            .map(|r| r.is_connected())
            .unwrap_or(false)
    }

    /// Resolve `method`'s required capability and demand it is present for
    /// the namespace; if `chain_ref` is given, demand the grant covers it.
    pub async fn assert_permission(
        &self,
        origin: &str,
        namespace: &str,
        capability: Capability,
        chain_ref: Option<&ChainRef>,
    ) -> Result<()> {
        let records = self.records.read().await;
        let record = records
            .get(&key(origin, namespace))
            .ok_or_else(|| WalletError::not_connected(origin))?;

        if !record.has_capability(capability) {
            return Err(WalletError::denied(format!(
                "{} lacks {:?} capability",
                origin, capability
            )));
        }
        if let Some(chain_ref) = chain_ref {
            if !record.capability_covers_chain(capability, chain_ref) {
                return Err(WalletError::denied(format!(
                    "{} capability not granted for {}",
                    origin, chain_ref
                )));
            }
        }
        Ok(())
    }

    /// Grant `Basic` + `Accounts` for `chain_ref`, attaching `account_ids`.
    /// Extends an existing Accounts grant's chain list rather than
    /// duplicating it.
    pub async fn grant_accounts(
        &self,
        origin: &str,
        namespace: &str,
        chain_ref: ChainRef,
        account_ids: Vec<String>,
    ) -> Result<PermissionRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key(origin, namespace))
            .or_insert_with(|| PermissionRecord {
                origin: origin.to_string(),
                namespace: namespace.to_string(),
                grants: Vec::new(),
                account_ids: Vec::new(),
            });

        if !record.grants.iter().any(|g| g.capability == Capability::Basic) {
            record.grants.push(Grant {
                capability: Capability::Basic,
                chain_refs: vec![],
            });
        }
        match record.grants.iter_mut().find(|g| g.capability == Capability::Accounts) {
            Some(grant) => {
                if !grant.chain_refs.contains(&chain_ref) {
                    grant.chain_refs.push(chain_ref);
                    grant.chain_refs.sort();
                }
            }
            None => record.grants.push(Grant {
                capability: Capability::Accounts,
                chain_refs: vec![chain_ref],
            }),
        }
        for id in account_ids {
            if !record.account_ids.contains(&id) {
                record.account_ids.push(id);
            }
        }

        let snapshot = record.clone();
        self.persist(&snapshot).await?;
        self.messenger.publish(
            "permissions.changed",
            serde_json::json!({ "origin": origin, "namespace": namespace }),
        );
        Ok(snapshot)
    }

    pub async fn grant_capability(
        &self,
        origin: &str,
        namespace: &str,
        capability: Capability,
        chain_ref: ChainRef,
    ) -> Result<PermissionRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key(origin, namespace))
            .or_insert_with(|| PermissionRecord {
                origin: origin.to_string(),
                namespace: namespace.to_string(),
                grants: Vec::new(),
                account_ids: Vec::new(),
            });
        match record.grants.iter_mut().find(|g| g.capability == capability) {
            Some(grant) => {
                if !grant.chain_refs.contains(&chain_ref) {
                    grant.chain_refs.push(chain_ref);
                    grant.chain_refs.sort();
                }
            }
            None => record.grants.push(Grant {
                capability,
                chain_refs: vec![chain_ref],
            }),
        }
        let snapshot = record.clone();
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    async fn persist(&self, record: &PermissionRecord) -> Result<()> {
        let value = serde_json::to_value(record).map_err(|e| WalletError::internal(e.to_string()))?;
        self.storage
            .put(Namespace::Permissions, &key(&record.origin, &record.namespace), StoredRecord::new(value))
            .await
            .map_err(|e| WalletError::storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn controller() -> PermissionsController {
        PermissionsController::new(Arc::new(MemoryStore::new()), Messenger::new(16))
    }

    #[tokio::test]
    async fn load_drops_and_deletes_unreadable_records() {
        let storage: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
        storage
            .put(Namespace::Permissions, "bad", StoredRecord::new(serde_json::json!({"not": "a permission record"})))
            .await
            .unwrap();
        let controller = PermissionsController::new(storage.clone(), Messenger::new(16));

        controller.load().await.unwrap();

        assert!(controller.get("bad", "eip155").await.is_none());
        assert!(storage.get(Namespace::Permissions, "bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn grant_accounts_requires_non_empty_account_ids_to_be_connected() {
        let controller = controller();
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        controller
            .grant_accounts("https://dapp.example", "eip155", chain_ref, vec![])
            .await
            .unwrap();
        assert!(!controller.is_connected("https://dapp.example", "eip155").await);

        controller
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:1").unwrap(),
                vec!["eip155:1:0xabc".to_string()],
            )
            .await
            .unwrap();
        assert!(controller.is_connected("https://dapp.example", "eip155").await);
    }

    #[tokio::test]
    async fn chain_switch_extends_grant_without_duplicating_accounts() {
        let controller = controller();
        controller
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:1").unwrap(),
                vec!["eip155:1:0xabc".to_string()],
            )
            .await
            .unwrap();
        let record = controller
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:137").unwrap(),
                vec!["eip155:1:0xabc".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(record.account_ids.len(), 1);
        let accounts_grant = record
            .grants
            .iter()
            .find(|g| g.capability == Capability::Accounts)
            .unwrap();
        assert_eq!(accounts_grant.chain_refs.len(), 2);
    }

    #[tokio::test]
    async fn accounts_grant_chain_refs_stay_sorted_unique_regardless_of_grant_order() {
        let controller = controller();
        controller
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:137").unwrap(),
                vec!["eip155:137:0xabc".to_string()],
            )
            .await
            .unwrap();
        let record = controller
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:1").unwrap(),
                vec!["eip155:137:0xabc".to_string()],
            )
            .await
            .unwrap();

        let accounts_grant = record
            .grants
            .iter()
            .find(|g| g.capability == Capability::Accounts)
            .unwrap();
        assert_eq!(
            accounts_grant.chain_refs,
            vec![ChainRef::parse("eip155:1").unwrap(), ChainRef::parse("eip155:137").unwrap()]
        );
    }

    #[tokio::test]
    async fn assert_permission_fails_for_unconnected_origin() {
        let controller = controller();
        let result = controller
            .assert_permission("https://dapp.example", "eip155", Capability::Accounts, None)
            .await;
        assert!(matches!(result, Err(WalletError::NotConnected(_))));
    }
}
