//! Chain access abstraction for the watcher pipelines.
//!
//! A [`ChainClient`] wraps one chain's RPC surface behind the capability
//! set the scanner and reconciler need: tip position, per-height transfer
//! listing, per-transaction amount resolution, and transaction lookup for
//! the pending sweep. Address canonicalization is part of the client so
//! matching rules stay chain-specific (EVM addresses compare
//! case-insensitively, base58 keys do not).

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::types::Currency;

pub mod evm;
pub mod solana;

pub use evm::EvmClient;
pub use solana::SolanaClient;

/// Chain access failure. Always transient from the engine's point of
/// view: the current unit of work is abandoned and retried on the next
/// scheduled cycle.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("malformed chain response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Transport(err.to_string())
    }
}

/// One value transfer observed in a block, reduced to the fields the
/// classifier needs. `from`/`to` are `None` when the chain reports fewer
/// than two participants (contract creation, vote transactions); `amount`
/// is `None` when listing the block does not reveal it and a follow-up
/// [`ChainClient::transfer_amount`] call is required.
#[derive(Debug, Clone)]
pub struct BlockTransfer {
    pub tx_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub amount: Option<BigDecimal>,
}

/// Outcome of looking up a transaction by its identifier during the
/// pending sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum TxLookup {
    /// The chain does not know the transaction (dropped or replaced).
    NotFound,
    /// Known but not yet included in a block.
    Pending,
    /// Included at the given block number / slot.
    Finalized(u64),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Currency (and thereby pipeline) this client serves.
    fn currency(&self) -> Currency;

    /// Canonical form used for address comparison.
    fn canonical(&self, address: &str) -> String;

    /// Current chain tip (block number or slot).
    async fn tip(&self) -> Result<u64, ChainError>;

    /// All transfers in the block at `position`. A position the chain
    /// skipped or has no data for yields an empty list, not an error.
    async fn block_transfers(&self, position: u64) -> Result<Vec<BlockTransfer>, ChainError>;

    /// Resolve the transferred amount for a transfer whose block listing
    /// did not carry it. `None` when the transaction cannot be found or
    /// moves no value.
    async fn transfer_amount(&self, tx_id: &str) -> Result<Option<BigDecimal>, ChainError>;

    /// Look up a transaction for the pending sweep.
    async fn lookup_transfer(&self, tx_id: &str) -> Result<TxLookup, ChainError>;
}
