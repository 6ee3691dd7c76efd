use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use futures::{stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::classify::{classify, AddressIndex, Classified};
use crate::chain::{BlockTransfer, ChainClient};
use crate::handlers;
use crate::ledger::Ledger;
use crate::metrics;

/// Sibling transactions within one height have no ordering dependency, so
/// their detail fetches fan out, bounded.
const DETAIL_FETCH_CONCURRENCY: usize = 8;

/// Incremental block/slot scanner for one chain.
///
/// Owns a process-local watermark: the highest position fully processed.
/// The watermark starts at the chain tip (history before process start is
/// never backfilled) and only advances after a height's transfers have
/// been classified and handled, so a failure mid-range makes the next
/// cycle retry the failed height instead of skipping it.
pub struct Scanner<L> {
    client: Arc<dyn ChainClient>,
    ledger: L,
    watermark: u64,
    poll_interval: Duration,
}

impl<L: Ledger> Scanner<L> {
    /// Create a scanner positioned at the current chain tip.
    ///
    /// An unreachable chain endpoint here is fatal: the process must not
    /// run with an unknown watermark.
    pub async fn start_at_tip(
        client: Arc<dyn ChainClient>,
        ledger: L,
        poll_interval: Duration,
    ) -> Result<Self> {
        let watermark = client
            .tip()
            .await
            .wrap_err_with(|| format!("Failed to read {} chain tip", client.currency()))?;

        info!(
            chain = client.currency().chain_label(),
            watermark, "Scanner starting at chain tip"
        );

        Ok(Self {
            client,
            ledger,
            watermark,
            poll_interval,
        })
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Poll forever at the configured interval. Cancellation happens at
    /// the manager level (task abort between cycles).
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.advance().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One scan cycle: poll the tip, then process every new height in
    /// ascending order, halting (not skipping) at the first failure.
    /// Chain or store errors are transient by design — the same unit of
    /// work is retried next cycle.
    pub async fn advance(&mut self) {
        let chain = self.client.currency().chain_label();

        let tip = match self.client.tip().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!(chain, error = %e, "Failed to read chain tip");
                metrics::record_error(chain, "tip");
                return;
            }
        };
        metrics::record_successful_poll(chain);

        while self.watermark < tip {
            let position = self.watermark + 1;
            match self.process_position(position).await {
                Ok(()) => {
                    self.watermark = position;
                    metrics::record_block_processed(chain, position);
                }
                Err(e) => {
                    warn!(
                        chain,
                        position,
                        error = %e,
                        "Height processing failed, retrying next cycle"
                    );
                    metrics::record_error(chain, "height");
                    break;
                }
            }
        }
    }

    /// Process a single height wholesale: either everything in it is
    /// classified and handled, or the whole height is retried.
    async fn process_position(&self, position: u64) -> Result<()> {
        let currency = self.client.currency();

        let transfers = self.client.block_transfers(position).await?;
        if transfers.is_empty() {
            return Ok(());
        }

        let accounts = self.ledger.deposit_accounts(currency).await?;
        let index = AddressIndex::new(accounts, |a| self.client.canonical(a));
        if index.is_empty() {
            return Ok(());
        }

        let classified = classify(&transfers, &index, |a| self.client.canonical(a));
        let fetched = self.resolve_amounts(&classified).await?;
        let zero = BigDecimal::from(0);

        for candidate in &classified.deposits {
            let Some(amount) = resolved_amount(candidate.transfer, &fetched) else {
                continue;
            };
            if *amount <= zero {
                continue;
            }
            handlers::record_deposit(
                &self.ledger,
                currency,
                candidate.account,
                &candidate.transfer.tx_id,
                amount,
                position,
            )
            .await?;
        }

        for candidate in &classified.withdrawals {
            let Some(amount) = resolved_amount(candidate.transfer, &fetched) else {
                continue;
            };
            if *amount <= zero {
                continue;
            }
            let destination = candidate.transfer.to.as_deref().unwrap_or_default();
            handlers::record_withdrawal(
                &self.ledger,
                currency,
                candidate.account,
                &candidate.transfer.tx_id,
                amount,
                position,
                destination,
            )
            .await?;
        }

        Ok(())
    }

    /// Fetch amounts for matched transfers whose block listing did not
    /// carry one. Any fetch failure fails the height.
    async fn resolve_amounts(
        &self,
        classified: &Classified<'_>,
    ) -> Result<HashMap<String, BigDecimal>> {
        let mut seen = HashSet::new();
        let wanted: Vec<String> = classified
            .deposits
            .iter()
            .chain(&classified.withdrawals)
            .filter(|c| c.transfer.amount.is_none())
            .map(|c| c.transfer.tx_id.clone())
            .filter(|tx_id| seen.insert(tx_id.clone()))
            .collect();

        let results: Vec<_> = stream::iter(wanted)
            .map(|tx_id| {
                let client = Arc::clone(&self.client);
                async move {
                    let amount = client.transfer_amount(&tx_id).await;
                    (tx_id, amount)
                }
            })
            .buffer_unordered(DETAIL_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut amounts = HashMap::new();
        for (tx_id, result) in results {
            if let Some(amount) = result? {
                amounts.insert(tx_id, amount);
            }
        }
        Ok(amounts)
    }
}

fn resolved_amount<'a>(
    transfer: &'a BlockTransfer,
    fetched: &'a HashMap<String, BigDecimal>,
) -> Option<&'a BigDecimal> {
    transfer.amount.as_ref().or_else(|| fetched.get(&transfer.tx_id))
}
