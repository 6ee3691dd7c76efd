use alloy::consensus::Transaction as _;
use alloy::eips::BlockId;
use alloy::primitives::utils::format_ether;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use std::str::FromStr;

use super::{BlockTransfer, ChainClient, ChainError, TxLookup};
use crate::types::Currency;

/// EVM chain client over a JSON-RPC HTTP provider.
///
/// Block receipts carry sender/recipient but not the transferred value,
/// so [`ChainClient::block_transfers`] lists transfers without amounts and
/// the scanner resolves amounts only for transfers that matched a
/// custodial address.
pub struct EvmClient {
    provider: RootProvider<Http<Client>>,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Failed to parse EVM RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider })
    }

    fn parse_tx_hash(tx_id: &str) -> Result<B256, ChainError> {
        B256::from_str(tx_id)
            .map_err(|e| ChainError::Protocol(format!("invalid transaction hash {tx_id}: {e}")))
    }

    /// Wei (base-unit integer) to the 18-decimal chain-native unit.
    fn wei_to_eth(value: alloy::primitives::U256) -> Result<BigDecimal, ChainError> {
        BigDecimal::from_str(&format_ether(value))
            .map_err(|e| ChainError::Protocol(format!("unparseable ether amount: {e}")))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn currency(&self) -> Currency {
        Currency::Eth
    }

    fn canonical(&self, address: &str) -> String {
        address.trim().to_ascii_lowercase()
    }

    async fn tip(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    async fn block_transfers(&self, position: u64) -> Result<Vec<BlockTransfer>, ChainError> {
        let receipts = self
            .provider
            .get_block_receipts(BlockId::number(position))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let Some(receipts) = receipts else {
            return Ok(Vec::new());
        };

        let transfers = receipts
            .into_iter()
            .map(|receipt| BlockTransfer {
                tx_id: format!("{:?}", receipt.transaction_hash),
                from: Some(format!("{:?}", receipt.from)),
                to: receipt.to.map(|to| format!("{:?}", to)),
                amount: None,
            })
            .collect();

        Ok(transfers)
    }

    async fn transfer_amount(&self, tx_id: &str) -> Result<Option<BigDecimal>, ChainError> {
        let hash = Self::parse_tx_hash(tx_id)?;

        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        match tx {
            Some(tx) => Ok(Some(Self::wei_to_eth(tx.inner.value())?)),
            None => Ok(None),
        }
    }

    async fn lookup_transfer(&self, tx_id: &str) -> Result<TxLookup, ChainError> {
        let hash = Self::parse_tx_hash(tx_id)?;

        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(match tx {
            None => TxLookup::NotFound,
            Some(tx) => match tx.block_number {
                Some(block) => TxLookup::Finalized(block),
                None => TxLookup::Pending,
            },
        })
    }
}
