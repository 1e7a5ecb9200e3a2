//! HTTP routes
//!
//! Everything besides the two WebSocket upgrades lives here. The
//! standalone dev host only needs a liveness probe; a real browser
//! extension never talks HTTP to this process at all.

pub async fn health() -> &'static str {
    "ok"
}
