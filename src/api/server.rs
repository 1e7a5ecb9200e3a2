//! API server
//!
//! Axum application builder and the shared state every route closes
//! over: the port router for dApp connections and the UI bridge for the
//! extension's own privileged surface.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{middleware as wallet_middleware, routes, websocket};
use crate::port_router::PortRouter;
use crate::ui_bridge::UiBridge;

pub struct AppState {
    pub router: Arc<PortRouter>,
    pub ui_bridge: Arc<UiBridge>,
    pub dapp_rate_limiter: wallet_middleware::RateLimitState,
    pub ui_rate_limiter: wallet_middleware::RateLimitState,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(router: Arc<PortRouter>, ui_bridge: Arc<UiBridge>) -> SharedAppState {
        Arc::new(Self {
            router,
            ui_bridge,
            dapp_rate_limiter: wallet_middleware::create_rate_limiter(),
            ui_rate_limiter: wallet_middleware::create_strict_rate_limiter(),
        })
    }
}

pub fn build_router(state: SharedAppState) -> Router {
    let dapp_rate_limiter = state.dapp_rate_limiter.clone();
    let dapp_rate_limit = move |headers: HeaderMap, request: Request, next: Next| {
        let dapp_rate_limiter = dapp_rate_limiter.clone();
        async move { wallet_middleware::dapp_rate_limit_middleware(headers, dapp_rate_limiter, request, next).await }
    };

    let ui_rate_limiter = state.ui_rate_limiter.clone();
    let ui_rate_limit = move |headers: HeaderMap, request: Request, next: Next| {
        let ui_rate_limiter = ui_rate_limiter.clone();
        async move { wallet_middleware::rate_limit_middleware(headers, ui_rate_limiter, request, next).await }
    };

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/ws/dapp",
            get(websocket::dapp_ws_handler).layer(axum::middleware::from_fn(dapp_rate_limit)),
        )
        .route(
            "/ws/ui",
            get(websocket::ui_ws_handler).layer(axum::middleware::from_fn(ui_rate_limit)),
        )
        .layer(axum::middleware::from_fn(wallet_middleware::security_headers_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
