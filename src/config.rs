//! Environment-based Configuration for the wallet core
//!
//! Configuration loads from environment variables first (all prefixed
//! `WALLET_`, optionally via a `.env` file), then an optional TOML file
//! passed on the command line can override individual fields. Nothing
//! sensitive (passwords, seeds) is ever read from configuration - those
//! only ever live inside the Vault.
//!
//! ## Environment Variables
//!
//! - `WALLET_PBKDF2_ITERATIONS` - vault key-derivation rounds (default: 600000, floor: 600000)
//! - `WALLET_AUTO_LOCK_MS` - idle timeout before the vault re-locks (default: 900000)
//! - `WALLET_STORAGE_PATH` - sqlite database path (default: "./walletd.db")
//! - `WALLET_LOG_FORMAT` - "pretty" or "json" (default: "pretty")
//! - `WALLET_LOG_FILTER` - tracing-subscriber EnvFilter string (default: "info")
//! - `WALLET_QUEUE_TTL_MS` - stale pending-approval expiry (default: 30000)
//! - `WALLET_RECEIPT_POLL_BASE_MS` - receipt poll backoff base (default: 3000)
//! - `WALLET_RECEIPT_POLL_CAP_MS` - receipt poll backoff cap (default: 30000)
//! - `WALLET_RECEIPT_POLL_MAX_ATTEMPTS` - receipt poll attempt ceiling (default: 20)
//! - `WALLET_BIND_ADDR` - dev host bind address (default: "127.0.0.1:8787")

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const MIN_PBKDF2_ITERATIONS: u32 = 600_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("{0} must be at least {1}")]
    TooLow(String, String),

    #[error("{0} must not be empty")]
    Empty(String),

    #[error("failed to read config file {0}: {1}")]
    FileRead(String, String),

    #[error("failed to parse config file {0}: {1}")]
    FileParse(String, String),
}

/// Receipt-poll exponential backoff parameters, shared by every transaction
/// adapter's confirmation loop.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReceiptPollConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReceiptPollConfig {
    fn default() -> Self {
        Self {
            base_ms: 3_000,
            cap_ms: 30_000,
            max_attempts: 20,
        }
    }
}

/// Main configuration struct threaded through the whole core.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// PBKDF2-SHA256 rounds used to derive the vault's encryption key.
    pub pbkdf2_iterations: u32,

    /// Idle duration, in milliseconds, before the vault auto-locks.
    pub auto_lock_timeout_ms: u64,

    /// sqlite database path for the persistent storage port.
    pub storage_path: String,

    /// "pretty" or "json" tracing-subscriber output.
    pub log_format: LogFormat,

    /// tracing-subscriber EnvFilter directive string.
    pub log_filter: String,

    /// Stale pending-approval expiry, in milliseconds.
    pub queue_ttl_ms: u64,

    /// Receipt-poll backoff parameters.
    pub receipt_poll: ReceiptPollConfig,

    /// Dev host bind address for the dApp port / UI bridge listener.
    pub bind_addr: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(
                "WALLET_LOG_FORMAT".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Overlay loaded from an optional `--config path.toml` file. Every field is
/// optional; present fields override whatever `from_env()` produced.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverlay {
    pub pbkdf2_iterations: Option<u32>,
    pub auto_lock_timeout_ms: Option<u64>,
    pub storage_path: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_filter: Option<String>,
    pub queue_ttl_ms: Option<u64>,
    pub receipt_poll: Option<ReceiptPollConfig>,
    pub bind_addr: Option<String>,
}

impl WalletConfig {
    /// Load configuration from environment variables (via `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let pbkdf2_iterations = env::var("WALLET_PBKDF2_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MIN_PBKDF2_ITERATIONS);

        let auto_lock_timeout_ms = env::var("WALLET_AUTO_LOCK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(900_000);

        let storage_path =
            env::var("WALLET_STORAGE_PATH").unwrap_or_else(|_| "./walletd.db".to_string());

        let log_format: LogFormat = env::var("WALLET_LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .parse()?;

        let log_filter = env::var("WALLET_LOG_FILTER").unwrap_or_else(|_| "info".to_string());

        let queue_ttl_ms = env::var("WALLET_QUEUE_TTL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);

        let receipt_poll = ReceiptPollConfig {
            base_ms: env::var("WALLET_RECEIPT_POLL_BASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3_000),
            cap_ms: env::var("WALLET_RECEIPT_POLL_CAP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            max_attempts: env::var("WALLET_RECEIPT_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        };

        let bind_addr =
            env::var("WALLET_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());

        let config = Self {
            pbkdf2_iterations,
            auto_lock_timeout_ms,
            storage_path,
            log_format,
            log_filter,
            queue_ttl_ms,
            receipt_poll,
            bind_addr,
        };

        config.validate()?;
        Ok(config)
    }

    /// Overlay a TOML file's fields onto this configuration, then re-validate.
    pub fn apply_overlay_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e.to_string()))?;
        let overlay: ConfigOverlay = toml::from_str(&raw)
            .map_err(|e| ConfigError::FileParse(path.display().to_string(), e.to_string()))?;

        if let Some(v) = overlay.pbkdf2_iterations {
            self.pbkdf2_iterations = v;
        }
        if let Some(v) = overlay.auto_lock_timeout_ms {
            self.auto_lock_timeout_ms = v;
        }
        if let Some(v) = overlay.storage_path {
            self.storage_path = v;
        }
        if let Some(v) = overlay.log_format {
            self.log_format = v;
        }
        if let Some(v) = overlay.log_filter {
            self.log_filter = v;
        }
        if let Some(v) = overlay.queue_ttl_ms {
            self.queue_ttl_ms = v;
        }
        if let Some(v) = overlay.receipt_poll {
            self.receipt_poll = v;
        }
        if let Some(v) = overlay.bind_addr {
            self.bind_addr = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations that would weaken the vault or leave storage
    /// unconfigured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::TooLow(
                "pbkdf2_iterations".to_string(),
                MIN_PBKDF2_ITERATIONS.to_string(),
            ));
        }
        if self.storage_path.trim().is_empty() {
            return Err(ConfigError::Empty("storage_path".to_string()));
        }
        Ok(())
    }

    /// Print configuration summary (no secrets are ever held here to hide).
    pub fn print_summary(&self) {
        println!("=== wallet core configuration ===");
        println!("pbkdf2 iterations: {}", self.pbkdf2_iterations);
        println!("auto-lock timeout: {}ms", self.auto_lock_timeout_ms);
        println!("storage path: {}", self.storage_path);
        println!("log format: {:?}", self.log_format);
        println!("log filter: {}", self.log_filter);
        println!("approval queue ttl: {}ms", self.queue_ttl_ms);
        println!(
            "receipt poll: base={}ms cap={}ms max_attempts={}",
            self.receipt_poll.base_ms, self.receipt_poll.cap_ms, self.receipt_poll.max_attempts
        );
        println!("bind addr: {}", self.bind_addr);
        println!("==================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_receipt_poll_matches_spec_defaults() {
        let config = ReceiptPollConfig::default();
        assert_eq!(config.base_ms, 3_000);
        assert_eq!(config.cap_ms, 30_000);
        assert_eq!(config.max_attempts, 20);
    }

    #[test]
    fn validate_rejects_low_iterations() {
        let config = WalletConfig {
            pbkdf2_iterations: 1_000,
            auto_lock_timeout_ms: 900_000,
            storage_path: "./walletd.db".to_string(),
            log_format: LogFormat::Pretty,
            log_filter: "info".to_string(),
            queue_ttl_ms: 30_000,
            receipt_poll: ReceiptPollConfig::default(),
            bind_addr: "127.0.0.1:8787".to_string(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::TooLow(_, _))));
    }

    #[test]
    fn validate_rejects_empty_storage_path() {
        let config = WalletConfig {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            auto_lock_timeout_ms: 900_000,
            storage_path: "  ".to_string(),
            log_format: LogFormat::Pretty,
            log_filter: "info".to_string(),
            queue_ttl_ms: 30_000,
            receipt_poll: ReceiptPollConfig::default(),
            bind_addr: "127.0.0.1:8787".to_string(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::Empty(_))));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
