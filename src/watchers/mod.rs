use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chain::{EvmClient, SolanaClient};
use crate::config::Config;

pub mod classify;
pub mod scanner;

pub use scanner::Scanner;

/// Manages the per-chain scan pipelines.
///
/// Each pipeline is an independent long-lived task with its own watermark
/// and address index; they share nothing in memory, only the store.
pub struct WatcherManager {
    scanners: Vec<Scanner<PgPool>>,
}

impl WatcherManager {
    /// Create scanners for both chains, positioned at their tips.
    pub async fn new(config: &Config, db: PgPool) -> Result<Self> {
        let evm_client = Arc::new(EvmClient::new(&config.evm.rpc_url)?);
        let solana_client = Arc::new(SolanaClient::new(&config.solana.rpc_url)?);

        let scanners = vec![
            Scanner::start_at_tip(
                evm_client,
                db.clone(),
                Duration::from_millis(config.evm.poll_interval_ms),
            )
            .await?,
            Scanner::start_at_tip(
                solana_client,
                db,
                Duration::from_millis(config.solana.poll_interval_ms),
            )
            .await?,
        ];

        info!(scanners = scanners.len(), "Watcher manager created");

        Ok(Self { scanners })
    }

    /// Run all scanners concurrently.
    /// Returns when any scanner fails or the shutdown signal is received.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for scanner in self.scanners {
            join_set.spawn(async move { scanner.run().await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping scanners");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A scanner exited unexpectedly without error");
                        Err(eyre::eyre!("scanner exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A scanner stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A scanner task panicked: {:?}", e);
                        Err(eyre::eyre!("scanner task panicked: {}", e))
                    }
                    None => {
                        error!("All scanner tasks exited unexpectedly");
                        Err(eyre::eyre!("all scanner tasks exited unexpectedly"))
                    }
                }
            }
        }
    }
}
