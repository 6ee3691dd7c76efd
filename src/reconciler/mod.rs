//! Timer-driven sweep that resolves records stuck in pending,
//! independently of the live scan.
//!
//! The live scanner only resolves a pending withdrawal if it happens to
//! observe the matching transaction in a scanned height; withdrawals the
//! service broadcasts out-of-band (and pending deposits created outside
//! the watcher) converge here.

use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, EvmClient, SolanaClient, TxLookup};
use crate::config::Config;
use crate::ledger::Ledger;
use crate::metrics;

/// Pending-record reconciler for one chain.
pub struct Reconciler<L> {
    client: Arc<dyn ChainClient>,
    ledger: L,
    interval: Duration,
}

impl<L: Ledger> Reconciler<L> {
    pub fn new(client: Arc<dyn ChainClient>, ledger: L, interval: Duration) -> Self {
        Self {
            client,
            ledger,
            interval,
        }
    }

    /// Sweep on a fixed timer forever. Cancellation happens at the
    /// manager level (task abort between sweeps).
    pub async fn run(self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a crash loop does
        // not hammer the RPC endpoint.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                warn!(
                    chain = self.client.currency().chain_label(),
                    error = %e,
                    "Reconcile sweep failed, retrying next tick"
                );
                metrics::record_error(self.client.currency().chain_label(), "reconcile");
            }
        }
    }

    /// One reconcile pass over every pending deposit and withdrawal for
    /// this chain.
    ///
    /// Runs concurrently with the live scanner against the same store;
    /// correctness relies on the guarded status transitions, not on any
    /// locking. A chain lookup failure skips that record until the next
    /// sweep.
    pub async fn sweep(&self) -> Result<()> {
        let currency = self.client.currency();
        let chain = currency.chain_label();

        for deposit in self.ledger.pending_deposits(currency).await? {
            match self.client.lookup_transfer(&deposit.tx_hash).await {
                Ok(TxLookup::Finalized(position)) => {
                    if self
                        .ledger
                        .confirm_deposit(&deposit.tx_hash, currency, position as i64)
                        .await?
                    {
                        // Status and stamp only: the credit happened when
                        // the row was created.
                        info!(
                            tx_hash = %deposit.tx_hash,
                            %currency,
                            position,
                            "Pending deposit confirmed"
                        );
                    }
                }
                // Unfindable or unmined deposits stay pending; there is
                // no failure state for inbound transfers.
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        chain,
                        tx_hash = %deposit.tx_hash,
                        error = %e,
                        "Failed to check pending deposit"
                    );
                    metrics::record_error(chain, "reconcile");
                }
            }
        }

        for withdrawal in self.ledger.pending_withdrawals(currency).await? {
            match self.client.lookup_transfer(&withdrawal.tx_hash).await {
                Ok(TxLookup::NotFound) => {
                    // Broadcast transaction was dropped or replaced and
                    // never landed. No balance effect: it was never
                    // debited.
                    if self
                        .ledger
                        .fail_withdrawal(&withdrawal.tx_hash, currency)
                        .await?
                    {
                        info!(
                            tx_hash = %withdrawal.tx_hash,
                            user_id = withdrawal.user_id,
                            %currency,
                            "Pending withdrawal failed: transaction not found on chain"
                        );
                        metrics::record_withdrawal_failed(chain);
                    }
                }
                Ok(TxLookup::Finalized(position)) => {
                    if self
                        .ledger
                        .confirm_withdrawal(&withdrawal.tx_hash, currency, position as i64)
                        .await?
                    {
                        let debit = -withdrawal.amount.clone();
                        self.ledger
                            .adjust_balance(withdrawal.user_id, currency, &debit)
                            .await?;

                        info!(
                            tx_hash = %withdrawal.tx_hash,
                            user_id = withdrawal.user_id,
                            amount = %withdrawal.amount,
                            %currency,
                            position,
                            "Pending withdrawal confirmed"
                        );
                        metrics::record_withdrawal_confirmed(chain);
                    }
                }
                Ok(TxLookup::Pending) => {}
                Err(e) => {
                    warn!(
                        chain,
                        tx_hash = %withdrawal.tx_hash,
                        error = %e,
                        "Failed to check pending withdrawal"
                    );
                    metrics::record_error(chain, "reconcile");
                }
            }
        }

        Ok(())
    }
}

/// Manages the per-chain reconcile sweeps, one timer each.
pub struct ReconcilerManager {
    reconcilers: Vec<Reconciler<PgPool>>,
}

impl ReconcilerManager {
    pub fn new(config: &Config, db: PgPool) -> Result<Self> {
        let evm_client = Arc::new(EvmClient::new(&config.evm.rpc_url)?);
        let solana_client = Arc::new(SolanaClient::new(&config.solana.rpc_url)?);

        let reconcilers = vec![
            Reconciler::new(
                evm_client,
                db.clone(),
                Duration::from_secs(config.evm.reconcile_interval_secs),
            ),
            Reconciler::new(
                solana_client,
                db,
                Duration::from_secs(config.solana.reconcile_interval_secs),
            ),
        ];

        info!(reconcilers = reconcilers.len(), "Reconciler manager created");

        Ok(Self { reconcilers })
    }

    /// Run all reconcilers concurrently.
    /// Returns when any reconciler fails or the shutdown signal is received.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for reconciler in self.reconcilers {
            join_set.spawn(async move { reconciler.run().await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping reconcilers");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A reconciler exited unexpectedly without error");
                        Err(eyre::eyre!("reconciler exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A reconciler stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A reconciler task panicked: {:?}", e);
                        Err(eyre::eyre!("reconciler task panicked: {}", e))
                    }
                    None => {
                        error!("All reconciler tasks exited unexpectedly");
                        Err(eyre::eyre!("all reconciler tasks exited unexpectedly"))
                    }
                }
            }
        }
    }
}
