use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::types::Currency;

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Fetch all custodial deposit accounts for one chain.
///
/// Fetched fresh once per processed height so newly registered users are
/// picked up within a scan cycle.
pub async fn deposit_accounts(pool: &PgPool, currency: Currency) -> Result<Vec<DepositAccount>> {
    let sql = match currency {
        Currency::Eth => {
            r#"SELECT id AS user_id, eth_deposit_address AS address FROM users
               WHERE eth_deposit_address IS NOT NULL AND eth_deposit_address <> ''"#
        }
        Currency::Sol => {
            r#"SELECT id AS user_id, sol_deposit_address AS address FROM users
               WHERE sol_deposit_address IS NOT NULL AND sol_deposit_address <> ''"#
        }
    };

    sqlx::query_as::<_, DepositAccount>(sql)
        .fetch_all(pool)
        .await
        .wrap_err("Failed to load deposit accounts")
}

/// Insert a deposit observed in a block, already confirmed.
///
/// Returns false when a row for this (tx_hash, currency) already exists.
/// The conflict is the idempotency mechanism, not a fault: a replayed
/// block must not credit twice, so callers only credit when this returns
/// true.
pub async fn insert_confirmed_deposit(pool: &PgPool, deposit: &NewDeposit) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO deposits (user_id, tx_hash, amount, currency, status, to_address,
            chain_position, confirmed_at)
        VALUES ($1, $2, $3, $4, 'confirmed', $5, $6, NOW())
        ON CONFLICT ON CONSTRAINT deposits_tx_hash_currency_key DO NOTHING
        "#,
    )
    .bind(deposit.user_id)
    .bind(&deposit.tx_hash)
    .bind(&deposit.amount)
    .bind(deposit.currency)
    .bind(&deposit.to_address)
    .bind(deposit.chain_position)
    .execute(pool)
    .await
    .wrap_err("Failed to insert deposit")?;

    Ok(result.rows_affected() > 0)
}

/// Adjust a user's cached balance for one chain by `delta` (negative to
/// debit). Single atomic UPDATE; safe under concurrent pipelines.
pub async fn adjust_balance(
    pool: &PgPool,
    user_id: i64,
    currency: Currency,
    delta: &BigDecimal,
) -> Result<()> {
    let sql = match currency {
        Currency::Eth => "UPDATE users SET eth_balance = eth_balance + $1 WHERE id = $2",
        Currency::Sol => "UPDATE users SET sol_balance = sol_balance + $1 WHERE id = $2",
    };

    sqlx::query(sql)
        .bind(delta)
        .bind(user_id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to adjust {} balance for user {}", currency, user_id))?;

    Ok(())
}

/// Look up a withdrawal by its chain transaction identifier.
pub async fn find_withdrawal(
    pool: &PgPool,
    tx_hash: &str,
    currency: Currency,
) -> Result<Option<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>(
        r#"SELECT id, user_id, tx_hash, amount, currency, status, from_address, to_address,
                  chain_position, created_at, confirmed_at
           FROM withdrawals WHERE tx_hash = $1 AND currency = $2"#,
    )
    .bind(tx_hash)
    .bind(currency)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to look up withdrawal")
}

/// Transition a withdrawal pending -> confirmed, stamping confirmation
/// time and chain position.
///
/// Guarded on the prior status: returns false when the row was already
/// resolved, so the live scanner and the reconciler can race without a
/// double debit — exactly one caller sees true and performs the debit.
pub async fn confirm_withdrawal(
    pool: &PgPool,
    tx_hash: &str,
    currency: Currency,
    chain_position: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE withdrawals
           SET status = 'confirmed', confirmed_at = NOW(), chain_position = $3
           WHERE tx_hash = $1 AND currency = $2 AND status = 'pending'"#,
    )
    .bind(tx_hash)
    .bind(currency)
    .bind(chain_position)
    .execute(pool)
    .await
    .wrap_err("Failed to confirm withdrawal")?;

    Ok(result.rows_affected() > 0)
}

/// Transition a withdrawal pending -> failed. Guarded like
/// [`confirm_withdrawal`]; no balance effect, the amount was never debited.
pub async fn fail_withdrawal(pool: &PgPool, tx_hash: &str, currency: Currency) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE withdrawals SET status = 'failed'
           WHERE tx_hash = $1 AND currency = $2 AND status = 'pending'"#,
    )
    .bind(tx_hash)
    .bind(currency)
    .execute(pool)
    .await
    .wrap_err("Failed to mark withdrawal failed")?;

    Ok(result.rows_affected() > 0)
}

/// Record an outbound transfer that matched no pending withdrawal.
///
/// Returns false when the anomaly was already recorded (block replay).
pub async fn insert_unauthorized_withdrawal(
    pool: &PgPool,
    withdrawal: &NewUnauthorizedWithdrawal,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO withdrawals (user_id, tx_hash, amount, currency, status, from_address,
            to_address, chain_position)
        VALUES ($1, $2, $3, $4, 'unauthorized', $5, $6, $7)
        ON CONFLICT ON CONSTRAINT withdrawals_tx_hash_currency_key DO NOTHING
        "#,
    )
    .bind(withdrawal.user_id)
    .bind(&withdrawal.tx_hash)
    .bind(&withdrawal.amount)
    .bind(withdrawal.currency)
    .bind(&withdrawal.from_address)
    .bind(&withdrawal.to_address)
    .bind(withdrawal.chain_position)
    .execute(pool)
    .await
    .wrap_err("Failed to insert unauthorized withdrawal")?;

    Ok(result.rows_affected() > 0)
}

/// Get pending deposits for one chain (reconciler sweep input)
pub async fn pending_deposits(pool: &PgPool, currency: Currency) -> Result<Vec<Deposit>> {
    sqlx::query_as::<_, Deposit>(
        r#"SELECT id, user_id, tx_hash, amount, currency, status, to_address,
                  chain_position, created_at, confirmed_at
           FROM deposits WHERE status = 'pending' AND currency = $1"#,
    )
    .bind(currency)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get pending deposits")
}

/// Get pending withdrawals for one chain (reconciler sweep input)
pub async fn pending_withdrawals(pool: &PgPool, currency: Currency) -> Result<Vec<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>(
        r#"SELECT id, user_id, tx_hash, amount, currency, status, from_address, to_address,
                  chain_position, created_at, confirmed_at
           FROM withdrawals WHERE status = 'pending' AND currency = $1"#,
    )
    .bind(currency)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get pending withdrawals")
}

/// Transition a deposit pending -> confirmed, stamping confirmation data.
/// Guarded on the prior status; no balance effect (deposits are credited
/// when the row is created).
pub async fn confirm_deposit(
    pool: &PgPool,
    tx_hash: &str,
    currency: Currency,
    chain_position: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE deposits
           SET status = 'confirmed', confirmed_at = NOW(), chain_position = $3
           WHERE tx_hash = $1 AND currency = $2 AND status = 'pending'"#,
    )
    .bind(tx_hash)
    .bind(currency)
    .bind(chain_position)
    .execute(pool)
    .await
    .wrap_err("Failed to confirm deposit")?;

    Ok(result.rows_affected() > 0)
}

/// Count deposits still pending (status endpoint)
pub async fn count_pending_deposits(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM deposits WHERE status = 'pending'")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count pending deposits")
}

/// Count withdrawals still pending (status endpoint)
pub async fn count_pending_withdrawals(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals WHERE status = 'pending'")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count pending withdrawals")
}

/// Count recorded unauthorized withdrawals (status endpoint)
pub async fn count_unauthorized_withdrawals(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals WHERE status = 'unauthorized'")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count unauthorized withdrawals")
}
