//! Common types shared across the watcher pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain-native currency of a watched chain.
///
/// Doubles as the pipeline identifier: every deposit and withdrawal row is
/// scoped to one currency, and the (tx_hash, currency) pair is the unique
/// key that makes block replay a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum Currency {
    Eth,
    Sol,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Eth => "eth",
            Currency::Sol => "sol",
        }
    }

    /// Metrics/log label for the chain this currency belongs to.
    pub fn chain_label(&self) -> &'static str {
        match self {
            Currency::Eth => "evm",
            Currency::Sol => "solana",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deposit lifecycle. Block inclusion counts as confirmation, so rows
/// created by the live scanner start out confirmed; pending rows come from
/// out-of-band creation and are resolved by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Confirmed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Withdrawal lifecycle. `Unauthorized` is terminal: an outbound transfer
/// from a custodial address with no matching pending record. It is never
/// debited and never revisited by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Confirmed,
    Failed,
    Unauthorized,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Confirmed => "confirmed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
