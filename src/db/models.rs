use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{Currency, DepositStatus, WithdrawalStatus};

// Amounts and balances are NUMERIC(30,18) in the database and BigDecimal in
// Rust. Both chains report integer base units (wei, lamports) which are
// converted to the chain-native decimal unit before they reach the store.

/// A user's deposit account on one chain: the custodial address the
/// scanner matches against, plus the owning user id.
#[derive(Debug, Clone, FromRow)]
pub struct DepositAccount {
    pub user_id: i64,
    pub address: String,
}

/// A recorded inbound transfer to a custodial address.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Deposit {
    pub id: i64,
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub status: DepositStatus,
    pub to_address: String,
    pub chain_position: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// For inserting new deposits
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub to_address: String,
    pub chain_position: i64,
}

/// A recorded outbound transfer from a custodial address.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub status: WithdrawalStatus,
    pub from_address: String,
    pub to_address: String,
    pub chain_position: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// For inserting unauthorized withdrawals observed on-chain
#[derive(Debug, Clone)]
pub struct NewUnauthorizedWithdrawal {
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub from_address: String,
    pub to_address: String,
    pub chain_position: i64,
}
