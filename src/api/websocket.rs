//! WebSocket transports
//!
//! One handler upgrades a dApp's port connection into the handshake/
//! request/response/event protocol the port router speaks; the other
//! upgrades the extension UI's privileged request/response channel and
//! fans snapshot-changed events into it. Grounded on the teacher's
//! `deposit_tracker::websocket::handle_socket` split-socket, two-task
//! pattern (one task forwards outbound traffic, one reads inbound).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use crate::api::server::SharedAppState;
use crate::port_router::{InboundEnvelope, OutboundEnvelope, PortSink};
use crate::ui_bridge::UiRequest;

struct WebSocketSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl PortSink for WebSocketSink {
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), ()> {
        let text = serde_json::to_string(&envelope).map_err(|_| ())?;
        self.sender.lock().await.send(Message::Text(text)).await.map_err(|_| ())
    }
}

pub async fn dapp_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<SharedAppState>,
) -> impl IntoResponse {
    let origin = params.get("origin").cloned().unwrap_or_else(|| "unknown".to_string());
    let namespace = params.get("namespace").cloned().unwrap_or_else(|| "eip155".to_string());
    ws.on_upgrade(move |socket| handle_dapp_socket(socket, origin, namespace, state))
}

async fn handle_dapp_socket(socket: WebSocket, origin: String, namespace: String, state: SharedAppState) {
    let (sender, mut receiver) = socket.split();
    let sink: Arc<dyn PortSink> = Arc::new(WebSocketSink { sender: Mutex::new(sender) });
    let port_id = state.router.connect(origin, namespace, sink).await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundEnvelope>(&text) {
                Ok(envelope) => state.router.handle_inbound(port_id, envelope).await,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    state.router.disconnect(port_id).await;
}

pub async fn ui_ws_handler(ws: WebSocketUpgrade, State(state): State<SharedAppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

async fn handle_ui_socket(socket: WebSocket, state: SharedAppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut changes = crate::messenger::TopicSubscription::new(&state.ui_bridge.messenger(), "");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(request) = serde_json::from_str::<UiRequest>(&text) else { continue };
                        let response = state.ui_bridge.handle_request(request).await;
                        let Ok(json) = serde_json::to_string(&response) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = changes.next() => {
                if event.is_none() {
                    break;
                }
                let envelope = state.ui_bridge.snapshot_changed_event().await;
                let Ok(json) = serde_json::to_string(&envelope) else { continue };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }
}
