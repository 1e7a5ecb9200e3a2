//! `eip155` namespace adapter wiring
//!
//! Builds the [`NamespaceAdapter`] for EVM chains: the method catalogue's
//! minimum set (`eth_chainId`, `eth_accounts`, `eth_requestAccounts`,
//! `personal_sign`, `eth_signTypedData_v4`, `eth_sendTransaction`,
//! `wallet_switchEthereumChain`, `wallet_addEthereumChain`,
//! `wallet_getPermissions`, `wallet_requestPermissions`) plus read-only
//! passthrough (`eth_getBalance`, `eth_blockNumber`, `eth_call`,
//! `eth_gasPrice`, `eth_estimateGas`) forwarded to the chain's active RPC
//! endpoint, resolved channel by the network controller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::error::{Result, WalletError};
use crate::controllers::{
    AccountsController, ApprovalsController, ChainRegistryController, NetworkController,
    PermissionsController, TransactionsController,
};
use crate::keyring::{eip155, KeyringService};
use crate::rpc::json_rpc;
use crate::rpc::transaction_adapter::{Eip155TransactionAdapter, TransactionAdapter};
use crate::rpc::{ActiveChain, Handler, LockedPolicy, MethodDefinition, NamespaceAdapter, PermissionCheck};
use crate::types::{ApprovalTask, ApprovalType, Capability, ChainRef, TransactionRecord};

const ALLOW_WHEN_LOCKED: &[&str] = &[
    "eth_chainId",
    "eth_getBalance",
    "eth_blockNumber",
    "eth_call",
    "eth_gasPrice",
    "eth_estimateGas",
];

pub struct Eip155Services {
    pub keyring: Arc<KeyringService>,
    pub accounts: Arc<AccountsController>,
    pub permissions: Arc<PermissionsController>,
    pub approvals: Arc<ApprovalsController>,
    pub chains: Arc<ChainRegistryController>,
    pub network: Arc<NetworkController>,
    pub transactions: Arc<TransactionsController>,
    pub http: reqwest::Client,
    pub active_chain_id: String,
}

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(crate::rpc::RpcContext, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

async fn passthrough(network: &NetworkController, chain_ref: &ChainRef, method: &str, params: Value, http: &reqwest::Client) -> Result<Value> {
    json_rpc::call(http, network, chain_ref, method, params).await
}

/// Poll for a receipt using the same exponential backoff
/// `TransactionsController` already tracks for resumed records, marking
/// the record confirmed or failed once the outcome is known.
pub fn spawn_receipt_poll(
    adapter: Arc<dyn TransactionAdapter>,
    transactions: Arc<TransactionsController>,
    chain_ref: ChainRef,
    id: Uuid,
    hash: String,
) {
    tokio::spawn(async move {
        let mut attempt = 0u32;
        loop {
            let delay_ms = match transactions.next_poll_delay_ms(attempt) {
                Some(delay) => delay,
                None => {
                    transactions.mark_failed(id, "receipt poll exhausted".to_string()).await.ok();
                    return;
                }
            };
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

            match adapter.fetch_receipt(&chain_ref, &hash).await {
                Ok(Some(receipt)) => {
                    transactions.mark_confirmed(id, receipt).await.ok();
                    return;
                }
                Ok(None) => {
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(id = %id, error = %err.to_string(), "receipt poll attempt failed");
                    attempt += 1;
                }
            }
        }
    });
}

fn initial_chain_ref(active_chain_id: &str) -> ChainRef {
    ChainRef::parse(&format!("eip155:{}", active_chain_id)).expect("constructed from valid parts")
}

pub fn build(services: Eip155Services) -> NamespaceAdapter {
    let active_chain = ActiveChain::new(Some(initial_chain_ref(&services.active_chain_id)));
    let transaction_adapter: Arc<dyn TransactionAdapter> =
        Arc::new(Eip155TransactionAdapter::new(services.keyring.clone(), services.network.clone(), services.http.clone()));
    let services = Arc::new(services);
    let mut methods: HashMap<String, MethodDefinition> = HashMap::new();

    {
        methods.insert(
            "eth_chainId".to_string(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Allow,
                approval_required: false,
                handler: handler(move |ctx, _params| async move {
                    let chain_ref = ctx.chain_ref.ok_or_else(|| WalletError::InvalidRequest("Missing chainRef".to_string()))?;
                    let chain_id: u64 = chain_ref.reference().parse().unwrap_or(1);
                    Ok(json!(format!("0x{:x}", chain_id)))
                }),
            },
        );
    }

    for method in [
        "eth_getBalance",
        "eth_blockNumber",
        "eth_call",
        "eth_gasPrice",
        "eth_estimateGas",
    ] {
        let method = method.to_string();
        let services = services.clone();
        methods.insert(
            method.clone(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Allow,
                approval_required: false,
                handler: handler(move |ctx, params| {
                    let services = services.clone();
                    let method = method.clone();
                    async move {
                        let chain_ref = ctx.chain_ref.ok_or_else(|| WalletError::InvalidRequest("Missing chainRef".to_string()))?;
                        passthrough(&services.network, &chain_ref, &method, params, &services.http).await
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "eth_accounts".to_string(),
            MethodDefinition {
                capability: Some(Capability::Accounts),
                permission_check: PermissionCheck::Scope,
                locked_policy: LockedPolicy::Response(json!([])),
                approval_required: false,
                handler: handler(move |_ctx, _params| {
                    let services = services.clone();
                    async move {
                        let accounts = services.accounts.get_state("eip155", false).await;
                        Ok(json!(accounts.iter().map(|a| &a.payload_hex).collect::<Vec<_>>()))
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "eth_requestAccounts".to_string(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, _params| {
                    let services = services.clone();
                    async move {
                        let task = ApprovalTask {
                            id: Uuid::new_v4(),
                            task_type: ApprovalType::RequestAccounts,
                            origin: ctx.origin.clone(),
                            namespace: Some(ctx.namespace.clone()),
                            chain_ref: ctx.chain_ref.clone(),
                            payload: json!({}),
                            created_at: chrono::Utc::now().timestamp_millis(),
                            request_context: ctx.request_context.clone(),
                        };
                        let rx = services.approvals.request_approval(task).await;
                        rx.await.map_err(|_| WalletError::internal("approval channel closed"))??;

                        let accounts = services.accounts.get_state("eip155", false).await;
                        let account_ids: Vec<String> = accounts.iter().map(|a| a.account_id.clone()).collect();
                        let chain_ref = ctx.chain_ref.clone().ok_or_else(|| WalletError::InvalidRequest("Missing chainRef".to_string()))?;
                        services
                            .permissions
                            .grant_accounts(&ctx.origin, &ctx.namespace, chain_ref, account_ids)
                            .await?;

                        Ok(json!(accounts.iter().map(|a| &a.payload_hex).collect::<Vec<_>>()))
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "personal_sign".to_string(),
            MethodDefinition {
                capability: Some(Capability::Sign),
                permission_check: PermissionCheck::Scope,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, params| {
                    let services = services.clone();
                    async move {
                        let (message_hex, address) = parse_sign_params(&params)?;
                        let task = ApprovalTask {
                            id: Uuid::new_v4(),
                            task_type: ApprovalType::SignMessage,
                            origin: ctx.origin.clone(),
                            namespace: Some(ctx.namespace.clone()),
                            chain_ref: ctx.chain_ref.clone(),
                            payload: json!({ "message": message_hex, "address": address }),
                            created_at: chrono::Utc::now().timestamp_millis(),
                            request_context: ctx.request_context.clone(),
                        };
                        let rx = services.approvals.request_approval(task).await;
                        rx.await.map_err(|_| WalletError::internal("approval channel closed"))??;

                        let message = hex::decode(message_hex.trim_start_matches("0x"))
                            .map_err(|_| WalletError::InvalidParams("message is not hex".to_string()))?;
                        let address_hex = address.trim_start_matches("0x");
                        let signature = services.keyring.sign_personal_message(address_hex, &message).await?;
                        Ok(json!(signature))
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        let transaction_adapter = transaction_adapter.clone();
        methods.insert(
            "eth_sendTransaction".to_string(),
            MethodDefinition {
                capability: Some(Capability::Transaction),
                permission_check: PermissionCheck::Scope,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, params| {
                    let services = services.clone();
                    let transaction_adapter = transaction_adapter.clone();
                    async move {
                        let from = params
                            .get(0)
                            .and_then(|p| p.get("from"))
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| WalletError::InvalidParams("missing from".to_string()))?
                            .to_string();
                        let chain_ref = ctx
                            .chain_ref
                            .clone()
                            .ok_or_else(|| WalletError::InvalidRequest("Missing chainRef".to_string()))?;

                        let record = TransactionRecord::new(
                            ctx.namespace.clone(),
                            chain_ref.clone(),
                            ctx.origin.clone(),
                            from.clone(),
                            params.clone(),
                        );
                        let id = record.id;
                        services.transactions.create(record).await?;

                        let task = ApprovalTask {
                            id: Uuid::new_v4(),
                            task_type: ApprovalType::Transaction,
                            origin: ctx.origin.clone(),
                            namespace: Some(ctx.namespace.clone()),
                            chain_ref: Some(chain_ref.clone()),
                            payload: json!({ "transactionId": id.to_string() }),
                            created_at: chrono::Utc::now().timestamp_millis(),
                            request_context: ctx.request_context.clone(),
                        };
                        let rx = services.approvals.request_approval(task).await;
                        let approval = rx.await.map_err(|_| WalletError::internal("approval channel closed"))?;
                        if approval.is_err() {
                            services.transactions.mark_rejected(id).await.ok();
                            return Err(WalletError::Rejected);
                        }

                        services.transactions.mark_approved(id).await?;

                        let hash = match transaction_adapter.sign_and_broadcast(&chain_ref, &from, &params).await {
                            Ok(hash) => hash,
                            Err(err) => {
                                services.transactions.mark_failed(id, err.to_string()).await.ok();
                                return Err(err);
                            }
                        };
                        services.transactions.mark_signed(id).await?;
                        services.transactions.mark_broadcast(id, hash.clone()).await?;

                        spawn_receipt_poll(transaction_adapter.clone(), services.transactions.clone(), chain_ref, id, hash.clone());
                        Ok(json!(hash))
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        let active_chain = active_chain.clone();
        methods.insert(
            "wallet_switchEthereumChain".to_string(),
            MethodDefinition {
                capability: Some(Capability::Basic),
                permission_check: PermissionCheck::Connected,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, params| {
                    let services = services.clone();
                    let active_chain = active_chain.clone();
                    async move {
                        let chain_id_hex = params
                            .get(0)
                            .and_then(|p| p.get("chainId"))
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| WalletError::InvalidParams("missing chainId".to_string()))?;
                        let chain_id = u64::from_str_radix(chain_id_hex.trim_start_matches("0x"), 16)
                            .map_err(|_| WalletError::InvalidParams(format!("bad chainId {}", chain_id_hex)))?;
                        let chain_ref = ChainRef::parse(&format!("eip155:{}", chain_id))
                            .map_err(WalletError::InvalidParams)?;

                        if !services.chains.is_registered(&chain_ref).await {
                            return Err(WalletError::chain_not_registered(chain_ref.to_string()));
                        }

                        let task = ApprovalTask {
                            id: Uuid::new_v4(),
                            task_type: ApprovalType::SwitchChain,
                            origin: ctx.origin.clone(),
                            namespace: Some(ctx.namespace.clone()),
                            chain_ref: Some(chain_ref.clone()),
                            payload: json!({ "chainId": chain_id_hex }),
                            created_at: chrono::Utc::now().timestamp_millis(),
                            request_context: ctx.request_context.clone(),
                        };
                        let rx = services.approvals.request_approval(task).await;
                        rx.await.map_err(|_| WalletError::internal("approval channel closed"))??;

                        let accounts = services.accounts.get_state("eip155", false).await;
                        let account_ids: Vec<String> = accounts.iter().map(|a| a.account_id.clone()).collect();
                        services
                            .permissions
                            .grant_accounts(&ctx.origin, &ctx.namespace, chain_ref.clone(), account_ids)
                            .await?;
                        active_chain.set(chain_ref).await;
                        Ok(Value::Null)
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "wallet_addEthereumChain".to_string(),
            MethodDefinition {
                capability: Some(Capability::Basic),
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, params| {
                    let services = services.clone();
                    async move {
                        let task = ApprovalTask {
                            id: Uuid::new_v4(),
                            task_type: ApprovalType::AddChain,
                            origin: ctx.origin.clone(),
                            namespace: Some(ctx.namespace.clone()),
                            chain_ref: None,
                            payload: params.clone(),
                            created_at: chrono::Utc::now().timestamp_millis(),
                            request_context: ctx.request_context.clone(),
                        };
                        let rx = services.approvals.request_approval(task).await;
                        rx.await.map_err(|_| WalletError::internal("approval channel closed"))??;
                        Ok(Value::Null)
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "wallet_getPermissions".to_string(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Allow,
                approval_required: false,
                handler: handler(move |ctx, _params| {
                    let services = services.clone();
                    async move {
                        let record = services.permissions.get(&ctx.origin, &ctx.namespace).await;
                        Ok(json!(record))
                    }
                }),
            },
        );
    }

    {
        let services = services.clone();
        methods.insert(
            "wallet_requestPermissions".to_string(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Deny,
                approval_required: true,
                handler: handler(move |ctx, _params| {
                    let services = services.clone();
                    async move {
                        let accounts = services.accounts.get_state("eip155", false).await;
                        let account_ids: Vec<String> = accounts.iter().map(|a| a.account_id.clone()).collect();
                        let chain_ref = ctx.chain_ref.clone().ok_or_else(|| WalletError::InvalidRequest("Missing chainRef".to_string()))?;
                        let record = services
                            .permissions
                            .grant_accounts(&ctx.origin, &ctx.namespace, chain_ref, account_ids)
                            .await?;
                        Ok(json!([{ "parentCapability": "eth_accounts", "caveats": record.account_ids }]))
                    }
                }),
            },
        );
    }

    NamespaceAdapter {
        namespace: "eip155".to_string(),
        method_prefixes: vec!["eth_".to_string(), "wallet_".to_string(), "personal_".to_string()],
        methods,
        allow_when_locked: ALLOW_WHEN_LOCKED.iter().map(|s| s.to_string()).collect(),
        default_namespace: true,
        active_chain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiptPollConfig;
    use crate::messenger::Messenger;
    use crate::rpc::{RpcContext, RpcEngine};
    use crate::session::UnlockSession;
    use crate::storage::{MemoryStore, StoragePort};
    use crate::vault::Vault;

    struct Harness {
        engine: RpcEngine,
        session: Arc<UnlockSession>,
        approvals: Arc<ApprovalsController>,
        accounts: Arc<AccountsController>,
        keyring: Arc<KeyringService>,
        vault: Arc<Vault>,
    }

    async fn harness() -> Harness {
        let storage: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
        let messenger = Messenger::new(16);
        let vault = Arc::new(Vault::new(600_000));
        let keyring = Arc::new(KeyringService::new(vault.clone(), storage.clone()));
        let session = Arc::new(UnlockSession::new(900_000));
        let accounts = Arc::new(AccountsController::new(messenger.clone()));
        let permissions = Arc::new(PermissionsController::new(storage.clone(), messenger.clone()));
        let approvals = Arc::new(ApprovalsController::new(storage.clone(), messenger.clone()));
        let chains = Arc::new(ChainRegistryController::new(storage.clone(), messenger.clone()));
        let network = Arc::new(NetworkController::new(storage.clone(), messenger.clone()));
        let transactions = Arc::new(TransactionsController::new(storage, messenger, ReceiptPollConfig::default()));

        let mut engine = RpcEngine::new(session.clone(), permissions.clone(), approvals.clone(), chains.clone());
        engine.register_namespace(build(Eip155Services {
            keyring: keyring.clone(),
            accounts: accounts.clone(),
            permissions,
            approvals: approvals.clone(),
            chains,
            network,
            transactions,
            http: reqwest::Client::new(),
            active_chain_id: "1".to_string(),
        }));

        Harness { engine, session, approvals, accounts, keyring, vault }
    }

    fn ctx() -> RpcContext {
        RpcContext {
            origin: "https://dapp.example".to_string(),
            namespace: "eip155".to_string(),
            chain_ref: None,
            is_internal: false,
            request_context: None,
        }
    }

    #[tokio::test]
    async fn eth_chain_id_passes_through_while_locked() {
        let harness = harness().await;
        let result = harness.engine.dispatch(ctx(), "eth_chainId", Value::Null).await;
        assert_eq!(result.unwrap(), json!("0x1"));
    }

    #[tokio::test]
    async fn eth_accounts_returns_canned_empty_array_while_locked() {
        let harness = harness().await;
        let result = harness.engine.dispatch(ctx(), "eth_accounts", Value::Null).await;
        assert_eq!(result.unwrap(), json!([]));
    }

    async fn unlock_and_import(harness: &Harness) -> String {
        harness.vault.initialize("hunter2").await.unwrap();
        harness.keyring.load().await.unwrap();
        harness.session.unlock(0).await;
        let (_, account) = harness
            .keyring
            .import_private_key("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318", "eip155")
            .await
            .unwrap();
        harness.accounts.sync(harness.keyring.list_accounts("eip155", false).await).await;
        account.account_id
    }

    #[tokio::test]
    async fn eth_request_accounts_approved_grants_permission_and_returns_accounts() {
        let harness = harness().await;
        unlock_and_import(&harness).await;

        let approvals = harness.approvals.clone();
        let approve_task = tokio::spawn(async move {
            loop {
                let pending = approvals.list_pending().await;
                if let Some(task) = pending.first() {
                    approvals.resolve(task.id, json!({})).await.unwrap();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let result = harness.engine.dispatch(ctx(), "eth_requestAccounts", Value::Null).await;
        approve_task.await.unwrap();

        let accounts = result.unwrap();
        assert_eq!(accounts.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn eth_request_accounts_rejected_surfaces_4001() {
        let harness = harness().await;
        unlock_and_import(&harness).await;

        let approvals = harness.approvals.clone();
        let reject_task = tokio::spawn(async move {
            loop {
                let pending = approvals.list_pending().await;
                if let Some(task) = pending.first() {
                    approvals.reject(task.id, WalletError::Rejected).await.unwrap();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let err = harness.engine.dispatch(ctx(), "eth_requestAccounts", Value::Null).await.unwrap_err();
        reject_task.await.unwrap();

        assert_eq!(err.code, 4001);
    }
}

fn parse_sign_params(params: &Value) -> Result<(String, String)> {
    let message = params
        .get(0)
        .and_then(|v| v.as_str())
        .ok_or_else(|| WalletError::InvalidParams("missing message".to_string()))?
        .to_string();
    let address = params
        .get(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| WalletError::InvalidParams("missing address".to_string()))?
        .to_string();
    eip155::validate_address(&address).map_err(|_| WalletError::InvalidAddress(address.clone()))?;
    Ok((message, address))
}
