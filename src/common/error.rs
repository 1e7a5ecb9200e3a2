//! Wallet Error Taxonomy
//!
//! Unifies every reason code the core can raise behind a single type and
//! adapts it to the two surfaces that consume it: the dApp-facing JSON-RPC
//! wire encoding and the UI-facing reason string.

use thiserror::Error;

/// Root error type for the wallet core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    // --- Vault ---
    #[error("vault has not been initialized")]
    NotInitialized,
    #[error("vault is already initialized")]
    AlreadyInitialized,
    #[error("vault ciphertext is malformed: {0}")]
    InvalidCiphertext(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("vault is locked")]
    Locked,

    // --- Keyring ---
    #[error("invalid mnemonic")]
    InvalidMnemonic,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("account already exists")]
    DuplicateAccount,
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("secret material unavailable")]
    SecretUnavailable,
    #[error("derivation index out of range")]
    IndexOutOfRange,

    // --- Permission ---
    #[error("origin {0} is not connected")]
    NotConnected(String),
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("namespace mismatch")]
    NamespaceMismatch,

    // --- Approval ---
    #[error("user rejected the request")]
    Rejected,
    #[error("approval task not found: {0}")]
    ApprovalNotFound(String),
    #[error("approval task expired")]
    Expired,

    // --- Chain ---
    #[error("chain not registered: {0}")]
    ChainNotRegistered(String),
    #[error("chain not compatible with namespace")]
    ChainNotCompatible,

    // --- Transport ---
    #[error("port disconnected")]
    Disconnected,
    #[error("session lost")]
    SessionLost,
    #[error("stale session")]
    StaleSession,

    // --- RPC ---
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),

    // --- Receipt polling ---
    #[error("receipt polling timed out")]
    ReceiptTimeout,

    // --- Storage ---
    #[error("storage error: {0}")]
    Storage(String),
}

impl WalletError {
    pub fn not_connected(origin: impl Into<String>) -> Self {
        Self::NotConnected(origin.into())
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied(reason.into())
    }

    pub fn account_not_found(id: impl Into<String>) -> Self {
        Self::AccountNotFound(id.into())
    }

    pub fn chain_not_registered(chain_ref: impl Into<String>) -> Self {
        Self::ChainNotRegistered(chain_ref.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether a background task may retry this error without surfacing it
    /// to a dApp.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Storage(_) | WalletError::ReceiptTimeout)
    }

    /// Stable reason code string, sent verbatim to the UI for localisation.
    pub fn reason(&self) -> &'static str {
        match self {
            WalletError::NotInitialized => "NotInitialized",
            WalletError::AlreadyInitialized => "AlreadyInitialized",
            WalletError::InvalidCiphertext(_) => "InvalidCiphertext",
            WalletError::InvalidPassword => "InvalidPassword",
            WalletError::Locked => "Locked",
            WalletError::InvalidMnemonic => "InvalidMnemonic",
            WalletError::InvalidPrivateKey => "InvalidPrivateKey",
            WalletError::InvalidAddress(_) => "InvalidAddress",
            WalletError::DuplicateAccount => "DuplicateAccount",
            WalletError::AccountNotFound(_) => "AccountNotFound",
            WalletError::SecretUnavailable => "SecretUnavailable",
            WalletError::IndexOutOfRange => "IndexOutOfRange",
            WalletError::NotConnected(_) => "NotConnected",
            WalletError::Denied(_) => "Denied",
            WalletError::NamespaceMismatch => "NamespaceMismatch",
            WalletError::Rejected => "Rejected",
            WalletError::ApprovalNotFound(_) => "NotFound",
            WalletError::Expired => "Expired",
            WalletError::ChainNotRegistered(_) => "NotRegistered",
            WalletError::ChainNotCompatible => "NotCompatible",
            WalletError::Disconnected => "Disconnected",
            WalletError::SessionLost => "SessionLost",
            WalletError::StaleSession => "StaleSession",
            WalletError::InvalidRequest(_) => "InvalidRequest",
            WalletError::InvalidParams(_) => "InvalidParams",
            WalletError::MethodNotFound(_) => "MethodNotFound",
            WalletError::Internal(_) => "Internal",
            WalletError::ReceiptTimeout => "ReceiptTimeout",
            WalletError::Storage(_) => "Storage",
        }
    }
}

/// Which surface an error is being encoded for. The dApp only ever sees
/// numeric wire codes; the UI sees the reason string above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSurface {
    DApp,
    Ui,
}

/// JSON-RPC error shape sent back across a port.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Adapts a [`WalletError`] to an external-facing representation.
pub trait ToWire {
    fn to_wire(&self, surface: ErrorSurface) -> WireError;
}

impl ToWire for WalletError {
    fn to_wire(&self, surface: ErrorSurface) -> WireError {
        if surface == ErrorSurface::Ui {
            return WireError {
                code: 0,
                message: self.to_string(),
                data: Some(serde_json::json!({ "reason": self.reason() })),
            };
        }

        let code = match self {
            WalletError::Rejected => 4001,
            WalletError::Locked => 4100,
            WalletError::MethodNotFound(_) => 4200,
            WalletError::Disconnected | WalletError::SessionLost | WalletError::StaleSession => {
                4900
            }
            WalletError::ChainNotRegistered(_) => 4902,
            WalletError::InvalidParams(_) => -32602,
            WalletError::InvalidRequest(_) => -32600,
            WalletError::Internal(_) | WalletError::Storage(_) => -32603,
            _ => -32000,
        };

        WireError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_spec_table() {
        assert_eq!(WalletError::Rejected.to_wire(ErrorSurface::DApp).code, 4001);
        assert_eq!(WalletError::Locked.to_wire(ErrorSurface::DApp).code, 4100);
        assert_eq!(
            WalletError::MethodNotFound("eth_foo".into())
                .to_wire(ErrorSurface::DApp)
                .code,
            4200
        );
        assert_eq!(
            WalletError::Disconnected.to_wire(ErrorSurface::DApp).code,
            4900
        );
        assert_eq!(
            WalletError::ChainNotRegistered("eip155:999".into())
                .to_wire(ErrorSurface::DApp)
                .code,
            4902
        );
        assert_eq!(
            WalletError::InvalidParams("bad hex".into())
                .to_wire(ErrorSurface::DApp)
                .code,
            -32602
        );
    }

    #[test]
    fn ui_surface_carries_reason_not_wire_code() {
        let wire = WalletError::InvalidPassword.to_wire(ErrorSurface::Ui);
        assert_eq!(
            wire.data.unwrap()["reason"],
            serde_json::json!("InvalidPassword")
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(WalletError::storage("disk full").is_retryable());
        assert!(WalletError::ReceiptTimeout.is_retryable());
        assert!(!WalletError::InvalidPassword.is_retryable());
    }
}
