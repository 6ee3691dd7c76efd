//! Deposit and withdrawal handlers.
//!
//! Both handlers are driven at-least-once: the scanner may replay a height
//! after a crash and the reconciler sweeps the same records concurrently.
//! Exactly-once balance mutation therefore hangs on two store properties —
//! the unique (tx_hash, currency) insert and the status-guarded
//! conditional update — and on one rule: the balance moves at deposit
//! insertion and at the withdrawal pending->confirmed transition, never
//! anywhere else.

use bigdecimal::BigDecimal;
use eyre::Result;
use tracing::{debug, info, warn};

use crate::db::{DepositAccount, NewDeposit, NewUnauthorizedWithdrawal};
use crate::ledger::Ledger;
use crate::metrics;
use crate::types::{Currency, WithdrawalStatus};

/// Record a confirmed inbound transfer and credit the owner.
///
/// Insert first, credit second: the insert's uniqueness constraint is the
/// replay guard, so the credit runs only for the call that created the
/// row. Block inclusion counts as confirmation; there is no
/// confirmation-depth wait for deposits.
pub async fn record_deposit<L: Ledger + ?Sized>(
    ledger: &L,
    currency: Currency,
    account: &DepositAccount,
    tx_id: &str,
    amount: &BigDecimal,
    position: u64,
) -> Result<()> {
    let deposit = NewDeposit {
        user_id: account.user_id,
        tx_hash: tx_id.to_string(),
        amount: amount.clone(),
        currency,
        to_address: account.address.clone(),
        chain_position: position as i64,
    };

    if !ledger.insert_confirmed_deposit(&deposit).await? {
        debug!(tx_hash = %tx_id, %currency, "Deposit already recorded, skipping");
        return Ok(());
    }

    ledger
        .adjust_balance(account.user_id, currency, amount)
        .await?;

    info!(
        tx_hash = %tx_id,
        user_id = account.user_id,
        %amount,
        %currency,
        position,
        "Deposit credited"
    );
    metrics::record_deposit_credited(currency.chain_label());

    Ok(())
}

/// Resolve an observed outbound transfer from a custodial address.
///
/// A matching pending record is the expected path: the service created it
/// before broadcasting, and observing the transaction on-chain confirms it
/// and debits the balance exactly once (the guarded transition decides the
/// winner if the reconciler sees it in the same window). No record at all
/// means funds left custody without authorization — recorded durably and
/// surfaced, never dropped.
pub async fn record_withdrawal<L: Ledger + ?Sized>(
    ledger: &L,
    currency: Currency,
    account: &DepositAccount,
    tx_id: &str,
    amount: &BigDecimal,
    position: u64,
    destination: &str,
) -> Result<()> {
    match ledger.find_withdrawal(tx_id, currency).await? {
        Some(withdrawal) if withdrawal.status == WithdrawalStatus::Pending => {
            if !ledger
                .confirm_withdrawal(tx_id, currency, position as i64)
                .await?
            {
                // Lost the race against the reconciler; it owns the debit.
                return Ok(());
            }

            let debit = -withdrawal.amount.clone();
            ledger
                .adjust_balance(withdrawal.user_id, currency, &debit)
                .await?;

            info!(
                tx_hash = %tx_id,
                user_id = withdrawal.user_id,
                amount = %withdrawal.amount,
                %currency,
                position,
                "Withdrawal confirmed"
            );
            metrics::record_withdrawal_confirmed(currency.chain_label());
        }
        Some(withdrawal) => {
            debug!(
                tx_hash = %tx_id,
                status = %withdrawal.status,
                %currency,
                "Withdrawal already resolved, skipping"
            );
        }
        None => {
            let anomaly = NewUnauthorizedWithdrawal {
                user_id: account.user_id,
                tx_hash: tx_id.to_string(),
                amount: amount.clone(),
                currency,
                from_address: account.address.clone(),
                to_address: destination.to_string(),
                chain_position: position as i64,
            };

            if ledger.insert_unauthorized_withdrawal(&anomaly).await? {
                warn!(
                    tx_hash = %tx_id,
                    user_id = account.user_id,
                    from_address = %account.address,
                    to_address = %destination,
                    %amount,
                    %currency,
                    "Unauthorized withdrawal detected"
                );
                metrics::record_unauthorized_withdrawal(currency.chain_label());
            }
        }
    }

    Ok(())
}
