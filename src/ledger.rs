//! Store seam between the scan/reconcile engine and the database.
//!
//! The engine only needs a handful of ledger operations; expressing them as
//! a trait keeps the scanners and reconcilers independent of sqlx and lets
//! the state-machine tests run against an in-memory double. `PgPool` is the
//! production implementation, delegating to the query functions in [`db`].

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::Result;
use sqlx::PgPool;

use crate::db::{
    self, Deposit, DepositAccount, NewDeposit, NewUnauthorizedWithdrawal, Withdrawal,
};
use crate::types::Currency;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// All custodial deposit accounts for one chain.
    async fn deposit_accounts(&self, currency: Currency) -> Result<Vec<DepositAccount>>;

    /// Unique-constrained insert of a confirmed deposit. Returns false on
    /// duplicate (tx_hash, currency) — the replay no-op.
    async fn insert_confirmed_deposit(&self, deposit: &NewDeposit) -> Result<bool>;

    /// Atomic balance adjustment for one user and chain; negative `delta`
    /// debits.
    async fn adjust_balance(
        &self,
        user_id: i64,
        currency: Currency,
        delta: &BigDecimal,
    ) -> Result<()>;

    async fn find_withdrawal(
        &self,
        tx_hash: &str,
        currency: Currency,
    ) -> Result<Option<Withdrawal>>;

    /// Guarded pending -> confirmed transition; true only for the caller
    /// that actually performed it.
    async fn confirm_withdrawal(
        &self,
        tx_hash: &str,
        currency: Currency,
        chain_position: i64,
    ) -> Result<bool>;

    /// Guarded pending -> failed transition.
    async fn fail_withdrawal(&self, tx_hash: &str, currency: Currency) -> Result<bool>;

    /// Unique-constrained insert of an anomaly record. Returns false on
    /// duplicate.
    async fn insert_unauthorized_withdrawal(
        &self,
        withdrawal: &NewUnauthorizedWithdrawal,
    ) -> Result<bool>;

    async fn pending_deposits(&self, currency: Currency) -> Result<Vec<Deposit>>;

    async fn pending_withdrawals(&self, currency: Currency) -> Result<Vec<Withdrawal>>;

    /// Guarded pending -> confirmed transition for out-of-band deposits.
    async fn confirm_deposit(
        &self,
        tx_hash: &str,
        currency: Currency,
        chain_position: i64,
    ) -> Result<bool>;
}

#[async_trait]
impl Ledger for PgPool {
    async fn deposit_accounts(&self, currency: Currency) -> Result<Vec<DepositAccount>> {
        db::deposit_accounts(self, currency).await
    }

    async fn insert_confirmed_deposit(&self, deposit: &NewDeposit) -> Result<bool> {
        db::insert_confirmed_deposit(self, deposit).await
    }

    async fn adjust_balance(
        &self,
        user_id: i64,
        currency: Currency,
        delta: &BigDecimal,
    ) -> Result<()> {
        db::adjust_balance(self, user_id, currency, delta).await
    }

    async fn find_withdrawal(
        &self,
        tx_hash: &str,
        currency: Currency,
    ) -> Result<Option<Withdrawal>> {
        db::find_withdrawal(self, tx_hash, currency).await
    }

    async fn confirm_withdrawal(
        &self,
        tx_hash: &str,
        currency: Currency,
        chain_position: i64,
    ) -> Result<bool> {
        db::confirm_withdrawal(self, tx_hash, currency, chain_position).await
    }

    async fn fail_withdrawal(&self, tx_hash: &str, currency: Currency) -> Result<bool> {
        db::fail_withdrawal(self, tx_hash, currency).await
    }

    async fn insert_unauthorized_withdrawal(
        &self,
        withdrawal: &NewUnauthorizedWithdrawal,
    ) -> Result<bool> {
        db::insert_unauthorized_withdrawal(self, withdrawal).await
    }

    async fn pending_deposits(&self, currency: Currency) -> Result<Vec<Deposit>> {
        db::pending_deposits(self, currency).await
    }

    async fn pending_withdrawals(&self, currency: Currency) -> Result<Vec<Withdrawal>> {
        db::pending_withdrawals(self, currency).await
    }

    async fn confirm_deposit(
        &self,
        tx_hash: &str,
        currency: Currency,
        chain_position: i64,
    ) -> Result<bool> {
        db::confirm_deposit(self, tx_hash, currency, chain_position).await
    }
}
