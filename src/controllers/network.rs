//! Network controller
//!
//! Owns RPC endpoint health per chain: a list of endpoints, an active
//! index, and a round-robin rotation strategy. `report_rpc_outcome`
//! updates health counters and rotates off an endpoint once its
//! consecutive-failure count crosses the threshold, scheduling a cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::common::error::{Result, WalletError};
use crate::messenger::Messenger;
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::ChainRef;

const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
const COOLDOWN_MS: i64 = 30_000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointHealth {
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<i64>,
}

impl EndpointHealth {
    fn new(url: String) -> Self {
        Self {
            url,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainEndpoints {
    pub endpoints: Vec<EndpointHealth>,
    pub active_index: usize,
}

pub struct NetworkController {
    chains: RwLock<HashMap<String, ChainEndpoints>>,
    storage: Arc<dyn StoragePort>,
    messenger: Messenger,
}

impl NetworkController {
    pub fn new(storage: Arc<dyn StoragePort>, messenger: Messenger) -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            storage,
            messenger,
        }
    }

    pub async fn register_endpoints(&self, chain_ref: &ChainRef, urls: Vec<String>) -> Result<()> {
        let mut chains = self.chains.write().await;
        let entry = ChainEndpoints {
            endpoints: urls.into_iter().map(EndpointHealth::new).collect(),
            active_index: 0,
        };
        chains.insert(chain_ref.to_string(), entry.clone());
        drop(chains);
        self.persist(chain_ref, &entry).await
    }

    pub async fn active_endpoint(&self, chain_ref: &ChainRef) -> Option<String> {
        let chains = self.chains.read().await;
        chains
            .get(&chain_ref.to_string())
            .and_then(|c| c.endpoints.get(c.active_index).map(|e| e.url.clone()))
    }

    pub async fn health_for(&self, chain_ref: &ChainRef) -> Option<ChainEndpoints> {
        self.chains.read().await.get(&chain_ref.to_string()).cloned()
    }

    /// Record the outcome of an RPC call against the currently active
    /// endpoint, rotating to the next one if the failure streak crosses
    /// the threshold.
    pub async fn report_rpc_outcome(
        &self,
        chain_ref: &ChainRef,
        now_ms: i64,
        success: bool,
    ) -> Result<()> {
        let mut chains = self.chains.write().await;
        let entry = chains
            .get_mut(&chain_ref.to_string())
            .ok_or_else(|| WalletError::chain_not_registered(chain_ref.to_string()))?;

        let active_index = entry.active_index;
        let rotated = {
            let endpoint = entry
                .endpoints
                .get_mut(active_index)
                .ok_or_else(|| WalletError::chain_not_registered(chain_ref.to_string()))?;

            if success {
                endpoint.success_count += 1;
                endpoint.consecutive_failures = 0;
                endpoint.cooldown_until = None;
                false
            } else {
                endpoint.failure_count += 1;
                endpoint.consecutive_failures += 1;
                if endpoint.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
                    endpoint.cooldown_until = Some(now_ms + COOLDOWN_MS);
                    true
                } else {
                    false
                }
            }
        };

        if rotated && entry.endpoints.len() > 1 {
            entry.active_index = (active_index + 1) % entry.endpoints.len();
        }

        let snapshot = entry.clone();
        drop(chains);
        self.persist(chain_ref, &snapshot).await?;
        self.messenger.publish(
            "network.changed",
            serde_json::json!({ "chainRef": chain_ref.to_string(), "activeIndex": snapshot.active_index }),
        );
        Ok(())
    }

    async fn persist(&self, chain_ref: &ChainRef, entry: &ChainEndpoints) -> Result<()> {
        let value = serde_json::to_value(entry).map_err(|e| WalletError::internal(e.to_string()))?;
        self.storage
            .put(Namespace::Network, &chain_ref.to_string(), StoredRecord::new(value))
            .await
            .map_err(|e| WalletError::storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn controller() -> NetworkController {
        NetworkController::new(Arc::new(MemoryStore::new()), Messenger::new(16))
    }

    #[tokio::test]
    async fn rotates_active_endpoint_after_threshold_failures() {
        let controller = controller();
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        controller
            .register_endpoints(&chain_ref, vec!["https://a".to_string(), "https://b".to_string()])
            .await
            .unwrap();

        for i in 0..CONSECUTIVE_FAILURE_THRESHOLD {
            controller
                .report_rpc_outcome(&chain_ref, 1_000 + i as i64, false)
                .await
                .unwrap();
        }

        assert_eq!(controller.active_endpoint(&chain_ref).await.unwrap(), "https://b");
    }

    #[tokio::test]
    async fn success_resets_consecutive_failure_count() {
        let controller = controller();
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        controller
            .register_endpoints(&chain_ref, vec!["https://a".to_string()])
            .await
            .unwrap();

        controller.report_rpc_outcome(&chain_ref, 1_000, false).await.unwrap();
        controller.report_rpc_outcome(&chain_ref, 1_001, true).await.unwrap();

        let chains = controller.chains.read().await;
        let endpoint = &chains.get(&chain_ref.to_string()).unwrap().endpoints[0];
        assert_eq!(endpoint.consecutive_failures, 0);
    }
}
