//! RPC engine
//!
//! Namespace registry, request resolution, and the fixed middleware
//! chain: locked guard -> permission guard -> attention request ->
//! dispatch. Grounded on the teacher's `api::middleware` tower-style
//! layering (each stage either short-circuits with an error response or
//! passes the request on), generalized from HTTP requests to JSON-RPC
//! `(method, params, context)` triples.

pub mod eip155_namespace;
pub mod json_rpc;
pub mod transaction_adapter;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use tokio::sync::RwLock;

use crate::common::error::{ErrorSurface, Result, ToWire, WalletError, WireError};
use crate::controllers::{ApprovalsController, ChainRegistryController, PermissionsController};
use crate::session::UnlockSession;
use crate::types::{Capability, ChainRef, RequestContext};

/// A namespace's current "active chain" for dApp requests that don't
/// carry an explicit `context.chainRef` (spec resolution step: derive
/// from the active chain when the request omits one). Mutable so
/// `wallet_switchEthereumChain` can move it at runtime.
#[derive(Clone)]
pub struct ActiveChain(Arc<RwLock<Option<ChainRef>>>);

impl ActiveChain {
    pub fn new(initial: Option<ChainRef>) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub async fn get(&self) -> Option<ChainRef> {
        self.0.read().await.clone()
    }

    pub async fn set(&self, chain_ref: ChainRef) {
        *self.0.write().await = Some(chain_ref);
    }
}

/// How the permission guard checks an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    None,
    Connected,
    Scope,
}

/// Locked-session policy a method declares when no provider-level or
/// namespace-level override applies.
#[derive(Debug, Clone)]
pub enum LockedPolicy {
    Allow,
    Deny,
    Response(Value),
    Queue,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(RpcContext, Value) -> HandlerFuture + Send + Sync>;

/// One namespace method's policy and implementation.
pub struct MethodDefinition {
    pub capability: Option<Capability>,
    pub permission_check: PermissionCheck,
    pub locked_policy: LockedPolicy,
    pub approval_required: bool,
    pub handler: Handler,
}

/// Request context resolved from the port/session and, where applicable,
/// an explicit `context.namespace`/`context.chainRef`.
#[derive(Debug, Clone)]
pub struct RpcContext {
    pub origin: String,
    pub namespace: String,
    pub chain_ref: Option<ChainRef>,
    pub is_internal: bool,
    /// Port/session/request identifiers, carried through to approval-gated
    /// handlers so a pending `ApprovalTask` can be expired if the port
    /// disconnects or its session rotates before the UI resolves it.
    pub request_context: Option<RequestContext>,
}

/// One namespace's method table plus its locked-session passthrough set.
pub struct NamespaceAdapter {
    pub namespace: String,
    pub method_prefixes: Vec<String>,
    pub methods: HashMap<String, MethodDefinition>,
    pub allow_when_locked: Vec<String>,
    pub default_namespace: bool,
    pub active_chain: ActiveChain,
}

impl NamespaceAdapter {
    fn owns_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
            || self.method_prefixes.iter().any(|p| method.starts_with(p.as_str()))
    }
}

pub struct RpcEngine {
    namespaces: HashMap<String, NamespaceAdapter>,
    session: Arc<UnlockSession>,
    permissions: Arc<PermissionsController>,
    approvals: Arc<ApprovalsController>,
    chains: Arc<ChainRegistryController>,
}

impl RpcEngine {
    pub fn new(
        session: Arc<UnlockSession>,
        permissions: Arc<PermissionsController>,
        approvals: Arc<ApprovalsController>,
        chains: Arc<ChainRegistryController>,
    ) -> Self {
        Self {
            namespaces: HashMap::new(),
            session,
            permissions,
            approvals,
            chains,
        }
    }

    pub fn register_namespace(&mut self, adapter: NamespaceAdapter) {
        self.namespaces.insert(adapter.namespace.clone(), adapter);
    }

    fn resolve_namespace(&self, explicit: Option<&str>, method: &str) -> Result<&NamespaceAdapter> {
        if let Some(ns) = explicit {
            return self
                .namespaces
                .get(ns)
                .ok_or_else(|| WalletError::InvalidRequest(format!("unknown namespace {}", ns)));
        }
        if let Some(adapter) = self.namespaces.values().find(|a| a.owns_method(method)) {
            return Ok(adapter);
        }
        self.namespaces
            .values()
            .find(|a| a.default_namespace)
            .ok_or_else(|| WalletError::MethodNotFound(method.to_string()))
    }

    /// Run `(method, params)` through the full middleware chain.
    pub async fn dispatch(
        &self,
        mut ctx: RpcContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, WireError> {
        self.dispatch_inner(&mut ctx, method, params)
            .await
            .map_err(|e| e.to_wire(ErrorSurface::DApp))
    }

    async fn dispatch_inner(&self, ctx: &mut RpcContext, method: &str, params: Value) -> Result<Value> {
        let adapter = self.resolve_namespace(
            if ctx.namespace.is_empty() { None } else { Some(ctx.namespace.as_str()) },
            method,
        )?;
        if ctx.namespace.is_empty() {
            ctx.namespace = adapter.namespace.clone();
        } else if ctx.namespace != adapter.namespace {
            return Err(WalletError::InvalidRequest("namespace mismatch".to_string()));
        }

        match &ctx.chain_ref {
            Some(chain_ref) if chain_ref.namespace() != adapter.namespace => {
                return Err(WalletError::InvalidRequest(
                    "chainRef namespace does not match resolved namespace".to_string(),
                ));
            }
            Some(_) => {}
            None => match adapter.active_chain.get().await {
                Some(active) => ctx.chain_ref = Some(active),
                None => return Err(WalletError::InvalidRequest("Missing chainRef".to_string())),
            },
        }

        let definition = adapter
            .methods
            .get(method)
            .ok_or_else(|| WalletError::MethodNotFound(method.to_string()))?;

        if let Some(canned) = self.locked_guard(ctx, adapter, method, definition).await? {
            return Ok(canned);
        }
        self.permission_guard(ctx, definition).await?;

        if definition.approval_required && !ctx.is_internal {
            // Handlers that require approval call back into the approvals
            // controller themselves (they need the task payload shaped for
            // their own type); the engine only ensures the guard ran.
            let _ = &self.approvals;
        }

        (definition.handler)(ctx.clone(), params).await
    }

    /// `Ok(Some(value))` short-circuits dispatch with a canned response
    /// (the `Response` locked policy); `Ok(None)` continues to the
    /// permission guard and handler.
    async fn locked_guard(
        &self,
        ctx: &RpcContext,
        adapter: &NamespaceAdapter,
        method: &str,
        definition: &MethodDefinition,
    ) -> Result<Option<Value>> {
        if ctx.is_internal || self.session.get_state().await.is_unlocked {
            return Ok(None);
        }
        if let Some(chain_ref) = &ctx.chain_ref {
            if let Ok(metadata) = self.chains.get(chain_ref).await {
                if let Some(policies) = &metadata.provider_policies {
                    let policy = policies.locked.get(method).or_else(|| policies.locked.get("*"));
                    if let Some(policy) = policy {
                        if let Some(response) = &policy.response {
                            return Ok(Some(response.clone()));
                        }
                        if policy.allow == Some(true) {
                            return Ok(None);
                        }
                        return Err(WalletError::Locked);
                    }
                }
            }
        }
        if adapter.allow_when_locked.iter().any(|m| m == method) {
            return Ok(None);
        }
        match &definition.locked_policy {
            LockedPolicy::Allow => Ok(None),
            LockedPolicy::Response(value) => Ok(Some(value.clone())),
            LockedPolicy::Queue => Err(WalletError::Locked),
            LockedPolicy::Deny => Err(WalletError::Locked),
        }
    }

    async fn permission_guard(&self, ctx: &RpcContext, definition: &MethodDefinition) -> Result<()> {
        if ctx.is_internal {
            return Ok(());
        }
        match definition.permission_check {
            PermissionCheck::None => Ok(()),
            PermissionCheck::Connected => {
                if self.permissions.is_connected(&ctx.origin, &ctx.namespace).await {
                    Ok(())
                } else {
                    Err(WalletError::not_connected(ctx.origin.clone()))
                }
            }
            PermissionCheck::Scope => {
                let capability = definition.capability.unwrap_or(Capability::Basic);
                self.permissions
                    .assert_permission(&ctx.origin, &ctx.namespace, capability, ctx.chain_ref.as_ref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::{ApprovalsController, PermissionsController};
    use crate::messenger::Messenger;
    use crate::storage::MemoryStore;
    use crate::types::{ChainMetadata, LockedMethodPolicy, NativeCurrency, ProviderPolicies};

    fn engine() -> (RpcEngine, Arc<UnlockSession>, Arc<PermissionsController>, Arc<ChainRegistryController>) {
        let storage = Arc::new(MemoryStore::new());
        let messenger = Messenger::new(16);
        let session = Arc::new(UnlockSession::new(900_000));
        let permissions = Arc::new(PermissionsController::new(storage.clone(), messenger.clone()));
        let approvals = Arc::new(ApprovalsController::new(storage.clone(), messenger.clone()));
        let chains = Arc::new(ChainRegistryController::new(storage, messenger));
        (
            RpcEngine::new(session.clone(), permissions.clone(), approvals, chains.clone()),
            session,
            permissions,
            chains,
        )
    }

    fn echo_adapter() -> NamespaceAdapter {
        echo_adapter_with_chain(ActiveChain::new(Some(ChainRef::parse("eip155:1").unwrap())))
    }

    fn echo_adapter_with_chain(active_chain: ActiveChain) -> NamespaceAdapter {
        let mut methods = HashMap::new();
        methods.insert(
            "eth_chainId".to_string(),
            MethodDefinition {
                capability: None,
                permission_check: PermissionCheck::None,
                locked_policy: LockedPolicy::Allow,
                approval_required: false,
                handler: Arc::new(|_, _| Box::pin(async { Ok(Value::String("0x1".to_string())) })),
            },
        );
        methods.insert(
            "eth_accounts".to_string(),
            MethodDefinition {
                capability: Some(Capability::Accounts),
                permission_check: PermissionCheck::Scope,
                locked_policy: LockedPolicy::Deny,
                approval_required: false,
                handler: Arc::new(|_, _| Box::pin(async { Ok(Value::Array(vec![])) })),
            },
        );
        NamespaceAdapter {
            namespace: "eip155".to_string(),
            method_prefixes: vec!["eth_".to_string()],
            methods,
            allow_when_locked: vec!["eth_chainId".to_string()],
            default_namespace: true,
            active_chain,
        }
    }

    fn ctx() -> RpcContext {
        RpcContext {
            origin: "https://dapp.example".to_string(),
            namespace: String::new(),
            chain_ref: None,
            is_internal: false,
            request_context: None,
        }
    }

    #[tokio::test]
    async fn passthrough_method_works_while_locked() {
        let (mut engine, _, _, _) = engine();
        engine.register_namespace(echo_adapter());

        let result = engine.dispatch(ctx(), "eth_chainId", Value::Null).await;
        assert_eq!(result.unwrap(), Value::String("0x1".to_string()));
    }

    #[tokio::test]
    async fn non_passthrough_method_fails_4100_while_locked() {
        let (mut engine, _, _, _) = engine();
        engine.register_namespace(echo_adapter());

        let err = engine.dispatch(ctx(), "eth_accounts", Value::Null).await.unwrap_err();
        assert_eq!(err.code, 4100);
    }

    #[tokio::test]
    async fn unlocked_but_unconnected_origin_fails_permission_guard() {
        let (mut engine, session, _, _) = engine();
        engine.register_namespace(echo_adapter());
        session.unlock(0).await;

        let err = engine.dispatch(ctx(), "eth_accounts", Value::Null).await.unwrap_err();
        assert_eq!(err.code, -32000);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (mut engine, session, _, _) = engine();
        engine.register_namespace(echo_adapter());
        session.unlock(0).await;

        let err = engine.dispatch(ctx(), "eth_doesNotExist", Value::Null).await.unwrap_err();
        assert_eq!(err.code, 4200);
    }

    #[tokio::test]
    async fn missing_chain_ref_fails_when_no_active_chain_is_set() {
        let (mut engine, session, _, _) = engine();
        engine.register_namespace(echo_adapter_with_chain(ActiveChain::new(None)));
        session.unlock(0).await;

        let err = engine.dispatch(ctx(), "eth_chainId", Value::Null).await.unwrap_err();
        assert_eq!(err.code, -32600);
    }

    #[tokio::test]
    async fn explicit_chain_ref_mismatched_namespace_is_rejected() {
        let (mut engine, session, _, _) = engine();
        engine.register_namespace(echo_adapter());
        session.unlock(0).await;

        let mut request = ctx();
        request.chain_ref = Some(ChainRef::parse("solana:101").unwrap());
        let err = engine.dispatch(request, "eth_chainId", Value::Null).await.unwrap_err();
        assert_eq!(err.code, -32600);
    }

    #[tokio::test]
    async fn implicit_chain_ref_derives_from_active_chain() {
        let (mut engine, session, permissions, _) = engine();
        engine.register_namespace(echo_adapter());
        session.unlock(0).await;
        permissions
            .grant_accounts(
                "https://dapp.example",
                "eip155",
                ChainRef::parse("eip155:1").unwrap(),
                vec!["eip155:1:0xabc".to_string()],
            )
            .await
            .unwrap();

        let result = engine.dispatch(ctx(), "eth_accounts", Value::Null).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn provider_policy_explicit_response_short_circuits_while_locked() {
        let (mut engine, _, _, chains) = engine();
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        chains
            .upsert_chain(ChainMetadata {
                chain_ref: chain_ref.clone(),
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
                provider_policies: Some(ProviderPolicies {
                    locked: HashMap::from([(
                        "eth_accounts".to_string(),
                        LockedMethodPolicy {
                            allow: None,
                            response: Some(Value::String("queued".to_string())),
                        },
                    )]),
                }),
            })
            .await
            .unwrap();
        engine.register_namespace(echo_adapter_with_chain(ActiveChain::new(Some(chain_ref))));

        let result = engine.dispatch(ctx(), "eth_accounts", Value::Null).await;
        assert_eq!(result.unwrap(), Value::String("queued".to_string()));
    }

    #[tokio::test]
    async fn provider_policy_allow_overrides_namespace_deny_while_locked() {
        let (mut engine, _, _, chains) = engine();
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        chains
            .upsert_chain(ChainMetadata {
                chain_ref: chain_ref.clone(),
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
                provider_policies: Some(ProviderPolicies {
                    locked: HashMap::from([(
                        "*".to_string(),
                        LockedMethodPolicy {
                            allow: Some(true),
                            response: None,
                        },
                    )]),
                }),
            })
            .await
            .unwrap();
        engine.register_namespace(echo_adapter_with_chain(ActiveChain::new(Some(chain_ref))));

        // eth_accounts is normally Deny-while-locked; the wildcard policy allows it through
        // to the permission guard instead, which then fails for lack of a grant.
        let err = engine.dispatch(ctx(), "eth_accounts", Value::Null).await.unwrap_err();
        assert_eq!(err.code, -32000);
    }
}
