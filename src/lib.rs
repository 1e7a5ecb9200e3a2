//! walletd-core
//!
//! The background core of a multi-chain wallet browser extension: a
//! password-sealed vault and keyring, per-origin permissioning, a
//! namespace-based JSON-RPC engine, a dApp port router, and a privileged
//! UI bridge. The standalone `walletd` binary hosts all of this over a
//! local socket for development without a real extension harness.

pub mod common;
pub mod config;
pub mod controllers;
pub mod keyring;
pub mod logging;
pub mod messenger;
pub mod port_router;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod types;
pub mod ui_bridge;
pub mod vault;

pub mod api;

pub use common::error::{ErrorSurface, Result, ToWire, WalletError, WireError};
pub use config::WalletConfig;
pub use messenger::Messenger;
pub use session::UnlockSession;
pub use vault::Vault;
