//! UI bridge
//!
//! The privileged channel used only by the extension's own UI: unlocking,
//! keyring management, approval resolution, onboarding, and network/account
//! switching. One request/response protocol (`ui:request` -> `ui:response`
//! or `ui:error`), plus a `ui:event` push whenever the aggregate snapshot
//! changes. Grounded on the teacher's `api::server` `AppState` pattern of a
//! single struct holding every service handle, adapted from HTTP routes to
//! a typed method dispatch table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::common::error::{Result, WalletError};
use crate::controllers::{
    AccountsController, ApprovalsController, ChainRegistryController, NetworkController,
    PermissionsController, TransactionsController,
};
use crate::keyring::{KeyringService, MnemonicWordCount};
use crate::messenger::Messenger;
use crate::session::UnlockSession;
use crate::types::{AccountRecord, ApprovalTask, ChainMetadata, ChainRef, PermissionRecord};
use crate::vault::Vault;

#[derive(Debug, Clone, Deserialize)]
pub struct UiRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEnvelope {
    #[serde(rename = "ui:response")]
    Response { id: String, result: Value },
    #[serde(rename = "ui:error")]
    Error { id: String, error: UiErrorBody },
    #[serde(rename = "ui:event")]
    Event { event: String, payload: Value },
}

#[derive(Debug, Clone, Serialize)]
pub struct UiErrorBody {
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiSnapshot {
    pub is_unlocked: bool,
    pub is_initialized: bool,
    pub accounts: Vec<AccountRecord>,
    pub permissions: Vec<PermissionRecord>,
    pub pending_approvals: Vec<ApprovalTask>,
    pub chains: Vec<ChainMetadata>,
}

pub struct UiBridge {
    vault: Arc<Vault>,
    keyring: Arc<KeyringService>,
    session: Arc<UnlockSession>,
    accounts: Arc<AccountsController>,
    permissions: Arc<PermissionsController>,
    approvals: Arc<ApprovalsController>,
    chains: Arc<ChainRegistryController>,
    network: Arc<NetworkController>,
    transactions: Arc<TransactionsController>,
    messenger: Messenger,
}

impl UiBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vault: Arc<Vault>,
        keyring: Arc<KeyringService>,
        session: Arc<UnlockSession>,
        accounts: Arc<AccountsController>,
        permissions: Arc<PermissionsController>,
        approvals: Arc<ApprovalsController>,
        chains: Arc<ChainRegistryController>,
        network: Arc<NetworkController>,
        transactions: Arc<TransactionsController>,
        messenger: Messenger,
    ) -> Self {
        Self {
            vault,
            keyring,
            session,
            accounts,
            permissions,
            approvals,
            chains,
            network,
            transactions,
            messenger,
        }
    }

    /// Handle one `ui:request`, returning the envelope to send back.
    pub async fn handle_request(&self, request: UiRequest) -> UiEnvelope {
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => UiEnvelope::Response { id: request.id, result },
            Err(err) => {
                let wire = crate::common::error::ToWire::to_wire(&err, crate::common::error::ErrorSurface::Ui);
                UiEnvelope::Error {
                    id: request.id,
                    error: UiErrorBody { reason: err.reason().to_string(), message: err.to_string(), data: wire.data },
                }
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "ui.session.unlock" => self.session_unlock(params).await,
            "ui.session.lock" => self.session_lock().await,
            "ui.session.status" => self.session_status().await,
            "ui.keyrings.generateMnemonic" => self.generate_mnemonic(params),
            "ui.keyrings.importMnemonic" => self.import_mnemonic(params).await,
            "ui.keyrings.importPrivateKey" => self.import_private_key(params).await,
            "ui.keyrings.deriveNext" => self.derive_next(params).await,
            "ui.keyrings.exportMnemonic" => self.export_mnemonic(params).await,
            "ui.keyrings.exportPrivateKey" => self.export_private_key(params).await,
            "ui.approvals.approve" => self.approve(params).await,
            "ui.approvals.reject" => self.reject(params).await,
            "ui.onboarding.status" => self.onboarding_status().await,
            "ui.onboarding.initialize" => self.onboarding_initialize(params).await,
            "ui.snapshot.get" => self.snapshot_value().await,
            "ui.networks.switchActive" => self.switch_active_network(params).await,
            "ui.networks.registerEndpoints" => self.register_endpoints(params).await,
            "ui.networks.health" => self.network_health(params).await,
            "ui.accounts.switchActive" => self.switch_active_account(params).await,
            other => Err(WalletError::MethodNotFound(other.to_string())),
        }
    }

    async fn session_unlock(&self, params: Value) -> Result<Value> {
        let password = params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing password".to_string()))?;

        self.vault.unlock(password, None).await?;
        self.keyring.load().await?;
        self.permissions.load().await?;
        self.chains.load().await?;
        let now = chrono::Utc::now().timestamp_millis();
        let state = self.session.unlock(now).await;

        self.messenger.publish("session.unlocked", serde_json::json!({}));
        Ok(serde_json::json!({ "isUnlocked": state.is_unlocked }))
    }

    async fn session_lock(&self) -> Result<Value> {
        self.vault.lock().await?;
        self.keyring.unload().await;
        self.approvals.clear_on_lock().await;
        let state = self.session.lock().await;

        self.messenger.publish("session.locked", serde_json::json!({}));
        Ok(serde_json::json!({ "isUnlocked": state.is_unlocked }))
    }

    async fn session_status(&self) -> Result<Value> {
        let state = self.session.get_state().await;
        Ok(serde_json::json!({
            "isUnlocked": state.is_unlocked,
            "isInitialized": self.vault.is_initialized().await,
        }))
    }

    fn generate_mnemonic(&self, params: Value) -> Result<Value> {
        let word_count = match params.get("wordCount").and_then(|v| v.as_u64()) {
            Some(12) | None => MnemonicWordCount::Twelve,
            Some(15) => MnemonicWordCount::Fifteen,
            Some(18) => MnemonicWordCount::Eighteen,
            Some(21) => MnemonicWordCount::TwentyOne,
            Some(24) => MnemonicWordCount::TwentyFour,
            Some(_) => return Err(WalletError::InvalidParams("unsupported word count".to_string())),
        };
        Ok(serde_json::json!({ "phrase": KeyringService::generate_mnemonic(word_count) }))
    }

    async fn import_mnemonic(&self, params: Value) -> Result<Value> {
        let phrase = params.get("phrase").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing phrase".to_string()))?;
        let namespace = params.get("namespace").and_then(|v| v.as_str()).unwrap_or("eip155");
        let (keyring_id, account) = self.keyring.add_hd_keyring(phrase, namespace).await?;
        self.sync_accounts(namespace).await;
        Ok(serde_json::json!({ "keyringId": keyring_id, "account": account }))
    }

    async fn import_private_key(&self, params: Value) -> Result<Value> {
        let hex_key = params.get("privateKey").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing privateKey".to_string()))?;
        let namespace = params.get("namespace").and_then(|v| v.as_str()).unwrap_or("eip155");
        let (keyring_id, account) = self.keyring.import_private_key(hex_key, namespace).await?;
        self.sync_accounts(namespace).await;
        Ok(serde_json::json!({ "keyringId": keyring_id, "account": account }))
    }

    async fn derive_next(&self, params: Value) -> Result<Value> {
        let keyring_id = parse_uuid(&params, "keyringId")?;
        let account = self.keyring.derive_next_account(keyring_id).await?;
        self.sync_accounts(&account.namespace.clone()).await;
        Ok(serde_json::to_value(account).map_err(|e| WalletError::internal(e.to_string()))?)
    }

    async fn export_mnemonic(&self, params: Value) -> Result<Value> {
        let keyring_id = parse_uuid(&params, "keyringId")?;
        let password = params.get("password").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing password".to_string()))?;
        let phrase = self.keyring.export_mnemonic(keyring_id, password).await?;
        Ok(serde_json::json!({ "phrase": phrase }))
    }

    async fn export_private_key(&self, params: Value) -> Result<Value> {
        let keyring_id = parse_uuid(&params, "keyringId")?;
        let password = params.get("password").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing password".to_string()))?;
        let hex_key = self.keyring.export_private_key(keyring_id, password).await?;
        Ok(serde_json::json!({ "privateKey": hex_key }))
    }

    async fn sync_accounts(&self, namespace: &str) {
        let accounts = self.keyring.list_accounts(namespace, true).await;
        self.accounts.sync(accounts).await;
    }

    /// Resolve a pending approval. Per-type semantics (`approveTransaction`,
    /// granting `Basic`+`Accounts`, signing, `upsertChain`) live in the RPC
    /// handler that is waiting on the corresponding receiver; this call only
    /// delivers the UI's decision payload.
    async fn approve(&self, params: Value) -> Result<Value> {
        let id = parse_uuid(&params, "id")?;
        let result = params.get("result").cloned().unwrap_or(Value::Null);
        self.approvals.resolve(id, result).await?;
        Ok(Value::Null)
    }

    async fn reject(&self, params: Value) -> Result<Value> {
        let id = parse_uuid(&params, "id")?;
        self.approvals.reject(id, WalletError::Rejected).await?;
        Ok(Value::Null)
    }

    async fn onboarding_status(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "isInitialized": self.vault.is_initialized().await,
            "isUnlocked": self.vault.is_unlocked().await,
        }))
    }

    async fn onboarding_initialize(&self, params: Value) -> Result<Value> {
        let password = params.get("password").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing password".to_string()))?;
        self.vault.initialize(password).await?;
        self.keyring.load().await?;
        let now = chrono::Utc::now().timestamp_millis();
        self.session.unlock(now).await;
        Ok(Value::Null)
    }

    async fn snapshot(&self) -> UiSnapshot {
        let state = self.session.get_state().await;
        UiSnapshot {
            is_unlocked: state.is_unlocked,
            is_initialized: self.vault.is_initialized().await,
            accounts: self.accounts.get_state("eip155", true).await,
            permissions: self.permissions.list().await,
            pending_approvals: self.approvals.list_pending().await,
            chains: self.chains.list().await,
        }
    }

    async fn snapshot_value(&self) -> Result<Value> {
        serde_json::to_value(self.snapshot().await).map_err(|e| WalletError::internal(e.to_string()))
    }

    async fn switch_active_network(&self, params: Value) -> Result<Value> {
        let chain_ref_raw = params.get("chainRef").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing chainRef".to_string()))?;
        let chain_ref = ChainRef::parse(chain_ref_raw).map_err(WalletError::InvalidRequest)?;
        if !self.chains.is_registered(&chain_ref).await {
            return Err(WalletError::chain_not_registered(chain_ref.to_string()));
        }
        self.messenger.publish(
            "network.active_changed",
            serde_json::json!({ "chainRef": chain_ref.to_string() }),
        );
        Ok(Value::Null)
    }

    /// Replace a registered chain's RPC endpoint list. Used by the settings
    /// UI when a user adds or edits a custom RPC URL for a chain.
    async fn register_endpoints(&self, params: Value) -> Result<Value> {
        let chain_ref_raw = params.get("chainRef").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing chainRef".to_string()))?;
        let chain_ref = ChainRef::parse(chain_ref_raw).map_err(WalletError::InvalidRequest)?;
        let urls = params.get("urls").and_then(|v| v.as_array())
            .ok_or_else(|| WalletError::InvalidParams("missing urls".to_string()))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        self.network.register_endpoints(&chain_ref, urls).await?;
        Ok(Value::Null)
    }

    async fn network_health(&self, params: Value) -> Result<Value> {
        let chain_ref_raw = params.get("chainRef").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing chainRef".to_string()))?;
        let chain_ref = ChainRef::parse(chain_ref_raw).map_err(WalletError::InvalidRequest)?;
        let health = self.network.health_for(&chain_ref).await;
        serde_json::to_value(health).map_err(|e| WalletError::internal(e.to_string()))
    }

    async fn switch_active_account(&self, params: Value) -> Result<Value> {
        let account_id = params.get("accountId").and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::InvalidParams("missing accountId".to_string()))?;
        self.messenger.publish(
            "accounts.active_changed",
            serde_json::json!({ "accountId": account_id }),
        );
        Ok(Value::Null)
    }

    /// A clone of the shared bus, for a transport loop that wants to push
    /// `ui:stateChanged` whenever accounts/permissions/approvals/session
    /// change without routing every controller event through a method call.
    pub fn messenger(&self) -> Messenger {
        self.messenger.clone()
    }

    /// Push a snapshot-changed event; called by the transport loop whenever
    /// a `TopicSubscription` filtered to accounts/permissions/approvals/
    /// session observes a change.
    pub async fn snapshot_changed_event(&self) -> UiEnvelope {
        let value = serde_json::to_value(self.snapshot().await).unwrap_or(Value::Null);
        UiEnvelope::Event { event: "ui:stateChanged".to_string(), payload: value }
    }
}

fn parse_uuid(params: &Value, field: &str) -> Result<Uuid> {
    let raw = params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| WalletError::InvalidParams(format!("missing {}", field)))?;
    Uuid::parse_str(raw).map_err(|_| WalletError::InvalidParams(format!("malformed {}", field)))
}
