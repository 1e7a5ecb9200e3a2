//! Shared infrastructure: the wallet error taxonomy lives here; configuration
//! and logging are siblings of this module at the crate root (see
//! [`crate::config`] and [`crate::logging`]).

pub mod error;

pub use error::{ErrorSurface, Result, ToWire, WalletError, WireError};
