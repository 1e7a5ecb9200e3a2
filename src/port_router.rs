//! Port router
//!
//! One `PortRouter` serves every live dApp port: a per-port state machine
//! (`Connected -> HandshakeSent`), request forwarding into the RPC engine,
//! and broadcast of `accountsChanged`/`chainChanged`/`metaChanged`/session
//! events. Grounded on the teacher's `deposit_tracker::websocket` pattern
//! of a shared broadcast bus fanned out to per-connection state, adapted
//! from a single topic to the port-oriented envelope protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::common::error::WalletError;
use crate::controllers::{AccountsController, ApprovalsController, PermissionsController};
use crate::messenger::Messenger;
use crate::rpc::{RpcContext, RpcEngine};
use crate::session::UnlockSession;
use crate::types::{ChainRef, RequestContext};

pub type PortId = u64;

const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    Handshake {
        #[serde(rename = "sessionId")]
        session_id: String,
        payload: HandshakePayload,
    },
    Request {
        #[serde(rename = "sessionId")]
        session_id: String,
        id: String,
        payload: RequestPayload,
    },
    Disconnect {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandshakePayload {
    #[serde(rename = "handshakeId")]
    pub handshake_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPayload {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    HandshakeAck {
        #[serde(rename = "sessionId")]
        session_id: String,
        payload: HandshakeAckPayload,
    },
    Response {
        #[serde(rename = "sessionId")]
        session_id: String,
        id: String,
        payload: ResponsePayload,
    },
    Event {
        payload: EventPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HandshakeAckPayload {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: u32,
    #[serde(rename = "handshakeId")]
    pub handshake_id: String,
    #[serde(rename = "chainRef")]
    pub chain_ref: Option<String>,
    #[serde(rename = "chainId")]
    pub chain_id: Option<String>,
    pub accounts: Vec<String>,
    #[serde(rename = "isUnlocked")]
    pub is_unlocked: bool,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsePayload {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub event: String,
    pub params: Vec<Value>,
}

/// Sink a port writes outbound envelopes to. One implementation per
/// transport (the standalone binary's websocket, an extension's
/// `runtime.Port`); a write failure drops the port.
#[async_trait]
pub trait PortSink: Send + Sync {
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), ()>;
}

struct PortState {
    origin: String,
    namespace: String,
    chain_ref: Option<ChainRef>,
    session_id: Option<String>,
    sink: Arc<dyn PortSink>,
}

pub struct PortRouter {
    rpc: Arc<RpcEngine>,
    session: Arc<UnlockSession>,
    permissions: Arc<PermissionsController>,
    accounts: Arc<AccountsController>,
    approvals: Arc<ApprovalsController>,
    messenger: Messenger,
    ports: RwLock<HashMap<PortId, PortState>>,
    next_id: AtomicU64,
}

impl PortRouter {
    pub fn new(
        rpc: Arc<RpcEngine>,
        session: Arc<UnlockSession>,
        permissions: Arc<PermissionsController>,
        accounts: Arc<AccountsController>,
        approvals: Arc<ApprovalsController>,
        messenger: Messenger,
    ) -> Self {
        Self {
            rpc,
            session,
            permissions,
            accounts,
            approvals,
            messenger,
            ports: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a newly connected port. The port is not usable for
    /// requests until its first `handshake` arrives.
    pub async fn connect(&self, origin: String, namespace: String, sink: Arc<dyn PortSink>) -> PortId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.ports.write().await.insert(
            id,
            PortState {
                origin,
                namespace,
                chain_ref: None,
                session_id: None,
                sink,
            },
        );
        id
    }

    /// Resolve a port's currently visible account ids (`[]` when locked).
    async fn visible_accounts(&self, origin: &str, namespace: &str) -> Vec<String> {
        if !self.session.get_state().await.is_unlocked {
            return Vec::new();
        }
        let permission = self.permissions.get(origin, namespace).await;
        let granted: Vec<String> = match permission {
            Some(p) if p.is_connected() => p.account_ids,
            _ => return Vec::new(),
        };
        self.accounts
            .get_state(namespace, false)
            .await
            .into_iter()
            .map(|a| a.account_id)
            .filter(|id| granted.contains(id))
            .collect()
    }

    /// Handle one inbound envelope for `port_id`. A port that sends
    /// `request` before any `handshake`, or whose `sessionId` no longer
    /// matches the last handshake, is dropped as stale.
    pub async fn handle_inbound(&self, port_id: PortId, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Handshake { session_id, payload } => {
                self.handle_handshake(port_id, session_id, payload).await;
            }
            InboundEnvelope::Request { session_id, id, payload } => {
                self.handle_request(port_id, session_id, id, payload).await;
            }
            InboundEnvelope::Disconnect { session_id: _ } => {
                self.disconnect(port_id).await;
            }
        }
    }

    async fn handle_handshake(&self, port_id: PortId, session_id: String, payload: HandshakePayload) {
        let (origin, namespace, previous_session) = {
            let mut ports = self.ports.write().await;
            let Some(state) = ports.get_mut(&port_id) else { return };
            let previous = state.session_id.replace(session_id.clone());
            (state.origin.clone(), state.namespace.clone(), previous)
        };

        // Session rotation: expire pendings tied to the old session first.
        if let Some(previous) = previous_session {
            if previous != session_id {
                self.approvals.expire_pending_by_request_context(port_id, &previous).await;
            }
        }

        let accounts = self.visible_accounts(&origin, &namespace).await;
        let unlocked = self.session.get_state().await.is_unlocked;
        let chain_ref = self.ports.read().await.get(&port_id).and_then(|p| p.chain_ref.clone());

        let ack = OutboundEnvelope::HandshakeAck {
            session_id: session_id.clone(),
            payload: HandshakeAckPayload {
                protocol_version: PROTOCOL_VERSION,
                handshake_id: payload.handshake_id,
                chain_ref: chain_ref.as_ref().map(|c| c.to_string()),
                chain_id: None,
                accounts,
                is_unlocked: unlocked,
                meta: None,
            },
        };

        self.send_or_drop(port_id, ack).await;
    }

    async fn handle_request(&self, port_id: PortId, session_id: String, id: String, payload: RequestPayload) {
        let matches_session = {
            let ports = self.ports.read().await;
            match ports.get(&port_id) {
                Some(state) if state.session_id.is_none() => {
                    drop(ports);
                    self.disconnect(port_id).await;
                    return;
                }
                Some(state) => state.session_id.as_deref() == Some(session_id.as_str()),
                None => return,
            }
        };
        if !matches_session {
            return;
        }

        let (origin, namespace, chain_ref) = {
            let ports = self.ports.read().await;
            let state = ports.get(&port_id).expect("checked above");
            (state.origin.clone(), state.namespace.clone(), state.chain_ref.clone())
        };

        let ctx = RpcContext {
            origin,
            namespace,
            chain_ref,
            is_internal: false,
            request_context: Some(RequestContext {
                port_id,
                session_id: session_id.clone(),
                request_id: id.clone(),
            }),
        };

        let outcome = self.rpc.dispatch(ctx, &payload.method, payload.params).await;
        let response_payload = match outcome {
            Ok(result) => ResponsePayload { jsonrpc: "2.0", id: payload.id, result: Some(result), error: None },
            Err(wire) => ResponsePayload {
                jsonrpc: "2.0",
                id: payload.id,
                result: None,
                error: Some(serde_json::json!({ "code": wire.code, "message": wire.message, "data": wire.data })),
            },
        };

        self.send_or_drop(
            port_id,
            OutboundEnvelope::Response { session_id, id, payload: response_payload },
        )
        .await;
    }

    /// Port disconnected or a write to it failed: reject pendings,
    /// expire matching approvals with `session_lost`, drop the port.
    pub async fn disconnect(&self, port_id: PortId) {
        let session_id = {
            let mut ports = self.ports.write().await;
            ports.remove(&port_id).and_then(|s| s.session_id)
        };
        if let Some(session_id) = session_id {
            self.approvals.expire_pending_by_request_context(port_id, &session_id).await;
        }
    }

    async fn send_or_drop(&self, port_id: PortId, envelope: OutboundEnvelope) {
        let sink = self.ports.read().await.get(&port_id).map(|s| s.sink.clone());
        if let Some(sink) = sink {
            if sink.send(envelope).await.is_err() {
                self.disconnect(port_id).await;
            }
        }
    }

    /// Broadcast `accountsChanged` to every port whose origin currently has
    /// a connected permission, computing the visible set per-port.
    pub async fn broadcast_accounts_changed(&self) {
        let snapshots: Vec<(PortId, String, String)> = self
            .ports
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.origin.clone(), s.namespace.clone()))
            .collect();

        for (port_id, origin, namespace) in snapshots {
            let accounts = self.visible_accounts(&origin, &namespace).await;
            let event = OutboundEnvelope::Event {
                payload: EventPayload {
                    event: "accountsChanged".to_string(),
                    params: vec![serde_json::json!(accounts)],
                },
            };
            self.send_or_drop(port_id, event).await;
        }
    }

    /// Broadcast an event uniformly to every connected port (`chainChanged`,
    /// `metaChanged`, `session:unlocked`, `session:locked`, `disconnect`).
    pub async fn broadcast_uniform(&self, event: &str, params: Vec<Value>) {
        let port_ids: Vec<PortId> = self.ports.read().await.keys().copied().collect();
        for port_id in port_ids {
            let envelope = OutboundEnvelope::Event {
                payload: EventPayload { event: event.to_string(), params: params.clone() },
            };
            self.send_or_drop(port_id, envelope).await;
        }
    }

    pub async fn set_port_chain(&self, port_id: PortId, chain_ref: ChainRef) {
        if let Some(state) = self.ports.write().await.get_mut(&port_id) {
            state.chain_ref = Some(chain_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    struct RecordingSink {
        sent: Mutex<Vec<OutboundEnvelope>>,
        fail: bool,
    }

    #[async_trait]
    impl PortSink for RecordingSink {
        async fn send(&self, envelope: OutboundEnvelope) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn router() -> (PortRouter, Arc<UnlockSession>) {
        let storage = Arc::new(MemoryStore::new());
        let messenger = Messenger::new(16);
        let session = Arc::new(UnlockSession::new(900_000));
        let permissions = Arc::new(PermissionsController::new(storage.clone(), messenger.clone()));
        let approvals = Arc::new(ApprovalsController::new(storage.clone(), messenger.clone()));
        let accounts = Arc::new(AccountsController::new(messenger.clone()));
        let chains = Arc::new(crate::controllers::ChainRegistryController::new(storage, messenger.clone()));
        let rpc = Arc::new(RpcEngine::new(session.clone(), permissions.clone(), approvals.clone(), chains));
        (
            PortRouter::new(rpc, session.clone(), permissions, accounts, approvals, messenger),
            session,
        )
    }

    #[tokio::test]
    async fn handshake_acks_with_locked_accounts_empty() {
        let (router, _session) = router();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(Vec::new()), fail: false });
        let port_id = router.connect("https://dapp.example".to_string(), "eip155".to_string(), sink.clone()).await;

        router
            .handle_inbound(
                port_id,
                InboundEnvelope::Handshake {
                    session_id: "s1".to_string(),
                    payload: HandshakePayload { handshake_id: "h1".to_string() },
                },
            )
            .await;

        let sent = sink.sent.lock().unwrap();
        match &sent[0] {
            OutboundEnvelope::HandshakeAck { payload, .. } => {
                assert!(!payload.is_unlocked);
                assert!(payload.accounts.is_empty());
            }
            _ => panic!("expected handshake_ack"),
        }
    }

    #[tokio::test]
    async fn request_before_handshake_drops_the_port_as_stale() {
        let (router, _session) = router();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(Vec::new()), fail: false });
        let port_id = router.connect("https://dapp.example".to_string(), "eip155".to_string(), sink.clone()).await;

        router
            .handle_inbound(
                port_id,
                InboundEnvelope::Request {
                    session_id: "s1".to_string(),
                    id: "1".to_string(),
                    payload: RequestPayload {
                        jsonrpc: "2.0".to_string(),
                        id: serde_json::json!(1),
                        method: "eth_chainId".to_string(),
                        params: Value::Null,
                    },
                },
            )
            .await;

        assert!(router.ports.read().await.get(&port_id).is_none());
    }

    #[tokio::test]
    async fn stale_session_id_is_ignored_not_forwarded() {
        let (router, _session) = router();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(Vec::new()), fail: false });
        let port_id = router.connect("https://dapp.example".to_string(), "eip155".to_string(), sink.clone()).await;
        router
            .handle_inbound(
                port_id,
                InboundEnvelope::Handshake { session_id: "s1".to_string(), payload: HandshakePayload { handshake_id: "h1".to_string() } },
            )
            .await;

        router
            .handle_inbound(
                port_id,
                InboundEnvelope::Request {
                    session_id: "stale".to_string(),
                    id: "1".to_string(),
                    payload: RequestPayload {
                        jsonrpc: "2.0".to_string(),
                        id: serde_json::json!(1),
                        method: "eth_chainId".to_string(),
                        params: Value::Null,
                    },
                },
            )
            .await;

        // Still connected (not dropped as stale-without-handshake), but no
        // second envelope (the response) was ever sent.
        assert!(router.ports.read().await.get(&port_id).is_some());
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_expires_pending_approvals_for_that_port_session() {
        let (router, _session) = router();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(Vec::new()), fail: false });
        let port_id = router.connect("https://dapp.example".to_string(), "eip155".to_string(), sink.clone()).await;
        router
            .handle_inbound(
                port_id,
                InboundEnvelope::Handshake { session_id: "s1".to_string(), payload: HandshakePayload { handshake_id: "h1".to_string() } },
            )
            .await;

        let task = crate::types::ApprovalTask {
            id: uuid::Uuid::new_v4(),
            task_type: crate::types::ApprovalType::SignMessage,
            origin: "https://dapp.example".to_string(),
            namespace: Some("eip155".to_string()),
            chain_ref: None,
            payload: serde_json::json!({}),
            created_at: 0,
            request_context: Some(RequestContext { port_id, session_id: "s1".to_string(), request_id: "r1".to_string() }),
        };
        let rx = router.approvals.request_approval(task).await;

        router.disconnect(port_id).await;

        assert!(matches!(rx.await.unwrap(), Err(WalletError::Rejected)));
    }
}
