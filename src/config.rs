use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the watcher
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub evm: EvmChainConfig,
    pub solana: SolanaChainConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// EVM chain configuration. The slow default poll matches the chain's
/// block cadence; the reconcile sweep runs more often than Solana's since
/// self-broadcast transactions resolve within a few blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainConfig {
    pub rpc_url: String,
    #[serde(default = "default_evm_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_evm_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

/// Solana-style chain configuration. Slots land roughly every 400ms, so
/// the poll interval is short; pending records are swept on a longer
/// timer.
#[derive(Debug, Clone, Deserialize)]
pub struct SolanaChainConfig {
    pub rpc_url: String,
    #[serde(default = "default_solana_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_solana_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

/// Default functions
fn default_evm_poll_interval() -> u64 {
    5000
}

fn default_solana_poll_interval() -> u64 {
    500
}

fn default_evm_reconcile_interval() -> u64 {
    30
}

fn default_solana_reconcile_interval() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let evm = EvmChainConfig {
            rpc_url: env::var("EVM_RPC_URL")
                .map_err(|_| eyre!("EVM_RPC_URL environment variable is required"))?,
            poll_interval_ms: env::var("EVM_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_evm_poll_interval()),
            reconcile_interval_secs: env::var("EVM_RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_evm_reconcile_interval()),
        };

        let solana = SolanaChainConfig {
            rpc_url: env::var("SOLANA_RPC_URL")
                .map_err(|_| eyre!("SOLANA_RPC_URL environment variable is required"))?,
            poll_interval_ms: env::var("SOLANA_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_solana_poll_interval()),
            reconcile_interval_secs: env::var("SOLANA_RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_solana_reconcile_interval()),
        };

        let config = Config {
            database,
            evm,
            solana,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if !self.evm.rpc_url.starts_with("http") {
            return Err(eyre!("evm.rpc_url must be an http(s) URL"));
        }

        if !self.solana.rpc_url.starts_with("http") {
            return Err(eyre!("solana.rpc_url must be an http(s) URL"));
        }

        if self.evm.poll_interval_ms == 0 || self.solana.poll_interval_ms == 0 {
            return Err(eyre!("poll intervals must be greater than zero"));
        }

        if self.evm.reconcile_interval_secs == 0 || self.solana.reconcile_interval_secs == 0 {
            return Err(eyre!("reconcile intervals must be greater than zero"));
        }

        Ok(())
    }
}
