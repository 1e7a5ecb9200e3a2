//! Chain registry controller
//!
//! Owns [`ChainMetadata`] keyed by [`ChainRef`]: display name, native
//! currency, RPC endpoints, and any locked-session provider policy
//! overrides the RPC engine's locked guard consults.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::common::error::{Result, WalletError};
use crate::messenger::Messenger;
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::{ChainMetadata, ChainRef};

pub struct ChainRegistryController {
    chains: RwLock<HashMap<String, ChainMetadata>>,
    storage: Arc<dyn StoragePort>,
    messenger: Messenger,
}

impl ChainRegistryController {
    pub fn new(storage: Arc<dyn StoragePort>, messenger: Messenger) -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            storage,
            messenger,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let rows = self
            .storage
            .get_all(Namespace::ChainRegistry)
            .await
            .map_err(|e| WalletError::storage(e.to_string()))?;
        let mut chains = self.chains.write().await;
        for (key, record) in rows {
            match serde_json::from_value::<ChainMetadata>(record.payload) {
                Ok(metadata) => {
                    chains.insert(key, metadata);
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "dropping unreadable chain registry record");
                    self.storage.delete(Namespace::ChainRegistry, &key).await.ok();
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, chain_ref: &ChainRef) -> Result<ChainMetadata> {
        self.chains
            .read()
            .await
            .get(&chain_ref.to_string())
            .cloned()
            .ok_or_else(|| WalletError::chain_not_registered(chain_ref.to_string()))
    }

    pub async fn is_registered(&self, chain_ref: &ChainRef) -> bool {
        self.chains.read().await.contains_key(&chain_ref.to_string())
    }

    pub async fn list(&self) -> Vec<ChainMetadata> {
        self.chains.read().await.values().cloned().collect()
    }

    pub async fn upsert_chain(&self, metadata: ChainMetadata) -> Result<()> {
        let key = metadata.chain_ref.to_string();
        let value = serde_json::to_value(&metadata).map_err(|e| WalletError::internal(e.to_string()))?;
        self.storage
            .put(Namespace::ChainRegistry, &key, StoredRecord::new(value))
            .await
            .map_err(|e| WalletError::storage(e.to_string()))?;

        self.chains.write().await.insert(key.clone(), metadata);
        self.messenger
            .publish("chains.changed", serde_json::json!({ "chainRef": key }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::NativeCurrency;

    fn metadata(chain_ref: ChainRef) -> ChainMetadata {
        ChainMetadata {
            chain_ref,
            namespace: "eip155".to_string(),
            chain_id: "0x1".to_string(),
            display_name: "Ethereum".to_string(),
            native_currency: NativeCurrency {
                name: "Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            rpc_endpoints: vec!["https://rpc.example".to_string()],
            block_explorers: vec![],
            features: vec![],
            provider_policies: None,
        }
    }

    #[tokio::test]
    async fn load_drops_and_deletes_unreadable_records() {
        let storage: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
        storage
            .put(Namespace::ChainRegistry, "bad", StoredRecord::new(serde_json::json!({"not": "chain metadata"})))
            .await
            .unwrap();
        let controller = ChainRegistryController::new(storage.clone(), Messenger::new(16));

        controller.load().await.unwrap();

        assert!(!controller.is_registered(&ChainRef::parse("eip155:1").unwrap()).await);
        assert!(storage.get(Namespace::ChainRegistry, "bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unregistered_chain_fails_with_chain_not_registered() {
        let controller = ChainRegistryController::new(Arc::new(MemoryStore::new()), Messenger::new(16));
        let result = controller.get(&ChainRef::parse("eip155:999").unwrap()).await;
        assert!(matches!(result, Err(WalletError::ChainNotRegistered(_))));
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let controller = ChainRegistryController::new(Arc::new(MemoryStore::new()), Messenger::new(16));
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        controller.upsert_chain(metadata(chain_ref.clone())).await.unwrap();

        let fetched = controller.get(&chain_ref).await.unwrap();
        assert_eq!(fetched.display_name, "Ethereum");
        assert!(controller.is_registered(&chain_ref).await);
    }
}
