//! API layer
//!
//! The standalone dev host: an axum app exposing `/ws/dapp` (the port
//! router's handshake/request/response/event protocol) and `/ws/ui`
//! (the privileged UI bridge), plus rate limiting and security headers.
//! A real browser extension never goes through this module at all — its
//! ports and UI surface talk to `PortRouter`/`UiBridge` directly.

pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

// Re-exports for convenience
pub use middleware::{RateLimiter, RateLimitState, ValidationError};
pub use server::{AppState, SharedAppState};
