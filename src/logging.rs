//! Structured Logging for the wallet core
//!
//! - JSON output for log aggregation in production, pretty output for dev
//! - Correlation IDs threaded through a request's whole lifecycle
//! - Per-domain structured events (vault, keyring, permission, approval,
//!   transaction, port, rpc)
//! - Secret material is never logged: callers pass ids and reason codes,
//!   never passwords, mnemonics, or private keys.
//!
//! # Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use walletd_core::logging::{init_tracing, LogLevel};
//! use walletd_core::config::WalletConfig;
//!
//! let config = WalletConfig::from_env()?;
//! init_tracing(&config)?;
//!
//! let id = "req-1";
//! tracing::info!(target: "wallet::rpc", request_id = %id, "dispatching eth_sendTransaction");
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::{LogFormat, WalletConfig};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging, one per core domain.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Vault lifecycle: initialize, unlock, lock, reseal.
    Vault,
    /// Keyring and account management.
    Keyring,
    /// Origin permission grants, revocations, and checks.
    Permission,
    /// Approval task lifecycle.
    Approval,
    /// Transaction state machine transitions.
    Transaction,
    /// Port connect/disconnect/session events.
    Port,
    /// RPC request/response events.
    Rpc,
}

/// A structured log event, serialized to JSON before being handed to `tracing`.
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601).
    pub timestamp: String,
    /// Log level.
    pub level: String,
    /// Event category.
    pub category: EventCategory,
    /// Human-readable message.
    pub message: String,
    /// Correlation ID for request tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Duration in milliseconds, for events that measure one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error details, for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events.
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Domain Event Logging
// ============================================================================

/// Log a vault lifecycle event (initialize, unlock, lock, reseal).
pub fn log_vault_event(event_type: &str, success: bool, correlation_id: &str) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let event = LogEvent::new(level, EventCategory::Vault, event_type)
        .with_correlation_id(correlation_id)
        .with_data(serde_json::json!({ "success": success }));

    if success {
        tracing::info!(target: "wallet::vault", "{}", event.to_json());
    } else {
        tracing::warn!(target: "wallet::vault", "{}", event.to_json());
    }
}

/// Log a permission check or grant/revoke decision.
pub fn log_permission_event(origin: &str, granted: bool, reason: Option<&str>) {
    let level = if granted { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Permission, "permission decision")
        .with_data(serde_json::json!({ "origin": origin, "granted": granted }));

    if let Some(reason) = reason {
        event = event.with_error("PermissionDenied", reason);
    }

    if granted {
        tracing::info!(target: "wallet::permission", "{}", event.to_json());
    } else {
        tracing::warn!(target: "wallet::permission", "{}", event.to_json());
    }
}

/// Log an approval task transition (created, resolved, rejected, expired).
pub fn log_approval_event(task_id: &str, transition: &str, origin: &str) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Approval, transition)
        .with_correlation_id(task_id)
        .with_data(serde_json::json!({ "origin": origin }));

    tracing::info!(target: "wallet::approval", "{}", event.to_json());
}

/// Log a transaction state machine transition.
pub fn log_transaction_event(tx_id: &str, from: &str, to: &str, chain_ref: &str) {
    let event = LogEvent::new(
        LogLevel::Info,
        EventCategory::Transaction,
        format!("{} -> {}", from, to),
    )
    .with_correlation_id(tx_id)
    .with_data(serde_json::json!({ "chain_ref": chain_ref }));

    tracing::info!(target: "wallet::transaction", "{}", event.to_json());
}

/// Log a port connect/disconnect/session event.
pub fn log_port_event(port_id: &str, event_type: &str, origin: Option<&str>) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Port, event_type)
        .with_correlation_id(port_id)
        .with_data(serde_json::json!({ "origin": origin }));

    tracing::info!(target: "wallet::port", "{}", event.to_json());
}

/// Log an RPC request/response pair, including its wire error code if one
/// was raised.
pub fn log_rpc_event(
    method: &str,
    request_id: &str,
    duration_ms: u64,
    error_code: Option<i32>,
) {
    let level = if error_code.is_some() {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };
    let mut event = LogEvent::new(level, EventCategory::Rpc, method)
        .with_correlation_id(request_id)
        .with_duration(duration_ms);

    if let Some(code) = error_code {
        event = event.with_error(code.to_string(), "rpc call returned an error");
    }

    match level {
        LogLevel::Warn => tracing::warn!(target: "wallet::rpc", "{}", event.to_json()),
        _ => tracing::info!(target: "wallet::rpc", "{}", event.to_json()),
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let lvl = format!("{:?}", level).to_lowercase();
        EnvFilter::new(format!("wallet={},tower_http={},axum={}", lvl, lvl, lvl))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize tracing from [`WalletConfig`]. The config's `log_filter`
/// overrides the default `RUST_LOG`-style filter when no environment
/// override is present.
pub fn init_tracing(config: &WalletConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    let json_format = config.log_format == LogFormat::Json;

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );
        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Logging errors.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

// ============================================================================
// Request ID Generation
// ============================================================================

/// Generate a unique correlation ID for request tracing.
pub fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();

    format!("{:x}-{:04x}", timestamp & 0xFFFFFFFF, rand::random::<u16>())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Rpc, "Test event")
            .with_correlation_id("test-123")
            .with_data(serde_json::json!({"key": "value"}))
            .with_duration(42);

        let json = event.to_json();
        assert!(json.contains("Test event"));
        assert!(json.contains("test-123"));
        assert!(json.contains("42"));
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn correlation_id_generation_is_non_empty_and_varies() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();

        assert!(!id1.is_empty());
        assert!(!id2.is_empty());
    }
}
