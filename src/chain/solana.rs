use async_trait::async_trait;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use eyre::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{BlockTransfer, ChainClient, ChainError, TxLookup};
use crate::types::Currency;

// Slots the cluster skipped or has not yet made available. A skipped slot
// holds no transactions and must not stall the scan loop.
const SLOT_SKIPPED: i64 = -32007;
const LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;
const BLOCK_NOT_AVAILABLE: i64 = -32004;

/// Solana JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// Solana JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    #[serde(default)]
    transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct BlockTransaction {
    transaction: TransactionEnvelope,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct TransactionEnvelope {
    #[serde(default)]
    signatures: Vec<String>,
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
struct TransactionMessage {
    #[serde(rename = "accountKeys", default)]
    account_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionMeta {
    #[serde(rename = "preBalances", default)]
    pre_balances: Vec<u64>,
    #[serde(rename = "postBalances", default)]
    post_balances: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct TransactionStatus {
    slot: u64,
    meta: Option<TransactionMeta>,
}

/// Solana-style chain client over plain JSON-RPC.
///
/// System transfers move lamports between the first two account keys, so
/// the transferred amount is read off the recipient's balance delta
/// (`postBalances[1] - preBalances[1]`) and block listings carry amounts
/// directly — no per-transaction follow-up fetch is needed.
pub struct SolanaClient {
    client: Client,
    rpc_url: String,
}

impl SolanaClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<RpcResponse<T>, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse<T>>()
            .await?;

        Ok(response)
    }

    /// Lamport delta to the 9-decimal chain-native unit, exactly.
    fn lamports_to_sol(delta: i128) -> BigDecimal {
        BigDecimal::new(BigInt::from(delta), 9)
    }

    /// Recipient balance delta for one transaction, or `None` when the
    /// metadata does not cover the second account.
    fn recipient_delta(meta: &TransactionMeta) -> Option<BigDecimal> {
        let pre = *meta.pre_balances.get(1)? as i128;
        let post = *meta.post_balances.get(1)? as i128;
        Some(Self::lamports_to_sol(post - pre))
    }

    fn transfers_from_block(block: BlockResponse) -> Vec<BlockTransfer> {
        block
            .transactions
            .into_iter()
            .filter_map(|tx| {
                let tx_id = tx.transaction.signatures.first()?.clone();
                let keys = &tx.transaction.message.account_keys;
                let amount = tx.meta.as_ref().and_then(Self::recipient_delta);

                Some(BlockTransfer {
                    tx_id,
                    from: keys.first().cloned(),
                    to: keys.get(1).cloned(),
                    amount,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChainClient for SolanaClient {
    fn currency(&self) -> Currency {
        Currency::Sol
    }

    fn canonical(&self, address: &str) -> String {
        // Base58 keys are case-sensitive; only whitespace is stripped.
        address.trim().to_string()
    }

    async fn tip(&self) -> Result<u64, ChainError> {
        let response: RpcResponse<u64> = self
            .call("getSlot", serde_json::json!([{"commitment": "confirmed"}]))
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Protocol(format!(
                "getSlot failed: {} - {}",
                error.code, error.message
            )));
        }

        response
            .result
            .ok_or_else(|| ChainError::Protocol("getSlot returned no result".to_string()))
    }

    async fn block_transfers(&self, position: u64) -> Result<Vec<BlockTransfer>, ChainError> {
        let params = serde_json::json!([position, {
            "encoding": "json",
            "transactionDetails": "full",
            "rewards": false,
            "maxSupportedTransactionVersion": 0,
            "commitment": "confirmed",
        }]);

        let response: RpcResponse<BlockResponse> = self.call("getBlock", params).await?;

        if let Some(error) = response.error {
            return match error.code {
                SLOT_SKIPPED | LONG_TERM_STORAGE_SLOT_SKIPPED | BLOCK_NOT_AVAILABLE => {
                    Ok(Vec::new())
                }
                _ => Err(ChainError::Protocol(format!(
                    "getBlock({}) failed: {} - {}",
                    position, error.code, error.message
                ))),
            };
        }

        Ok(response
            .result
            .map(Self::transfers_from_block)
            .unwrap_or_default())
    }

    async fn transfer_amount(&self, tx_id: &str) -> Result<Option<BigDecimal>, ChainError> {
        let params = serde_json::json!([tx_id, {
            "commitment": "confirmed",
            "maxSupportedTransactionVersion": 0,
        }]);

        let response: RpcResponse<TransactionStatus> = self.call("getTransaction", params).await?;

        if let Some(error) = response.error {
            return Err(ChainError::Protocol(format!(
                "getTransaction({}) failed: {} - {}",
                tx_id, error.code, error.message
            )));
        }

        Ok(response
            .result
            .and_then(|tx| tx.meta.as_ref().and_then(Self::recipient_delta)))
    }

    async fn lookup_transfer(&self, tx_id: &str) -> Result<TxLookup, ChainError> {
        let params = serde_json::json!([tx_id, {
            "commitment": "confirmed",
            "maxSupportedTransactionVersion": 0,
        }]);

        let response: RpcResponse<TransactionStatus> = self.call("getTransaction", params).await?;

        if let Some(error) = response.error {
            return Err(ChainError::Protocol(format!(
                "getTransaction({}) failed: {} - {}",
                tx_id, error.code, error.message
            )));
        }

        Ok(match response.result {
            Some(status) => TxLookup::Finalized(status.slot),
            None => TxLookup::NotFound,
        })
    }
}
