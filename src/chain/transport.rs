//! RPC transport seam. The reader, verifier and orchestrators only talk to
//! the chain through `ChainTransport`, so an endpoint can be swapped for a
//! fallback (or a test double) without touching the callers.

use crate::chain::types::{RawLog, RpcError, TxReceipt};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionReceipt, TransactionRequest};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// `eth_call` against latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// `eth_getTransactionReceipt`. `Ok(None)` while the tx is pending or unknown.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError>;

    /// Endpoint label for logs.
    fn endpoint(&self) -> &str;
}

/// HTTP JSON-RPC transport backed by an alloy provider.
pub struct AlloyTransport {
    provider: DynProvider,
    url: String,
    request_timeout: Duration,
}

impl AlloyTransport {
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self, RpcError> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .erased();
        info!(url = %redact(url), "chain transport ready");
        Ok(Self {
            provider,
            url: redact(url),
            request_timeout,
        })
    }
}

#[async_trait]
impl ChainTransport for AlloyTransport {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));
        match tokio::time::timeout(self.request_timeout, self.provider.call(tx)).await {
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
            Ok(Err(e)) => Err(RpcError::classify(e.to_string())),
            Ok(Ok(bytes)) => Ok(bytes),
        }
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let fut = self.provider.get_transaction_receipt(tx_hash);
        match tokio::time::timeout(self.request_timeout, fut).await {
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
            Ok(Err(e)) => Err(RpcError::classify(e.to_string())),
            Ok(Ok(None)) => {
                debug!(tx = %tx_hash, "receipt not yet available");
                Ok(None)
            }
            Ok(Ok(Some(receipt))) => Ok(Some(normalise_receipt(&receipt))),
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn normalise_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| RawLog {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
        .collect();

    TxReceipt {
        tx_hash: receipt.transaction_hash,
        success: receipt.status(),
        from: receipt.from,
        to: receipt.to,
        block_number: receipt.block_number,
        logs,
    }
}

/// Strip the path (usually an API key) from an RPC URL before logging it.
pub fn redact(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) if slash + 1 < rest.len() => {
                    format!("{}://{}/…", &url[..scheme_end], &rest[..slash])
                }
                _ => url.to_string(),
            }
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_key_path() {
        assert_eq!(
            redact("https://polygon-mainnet.g.alchemy.com/v2/secretkey"),
            "https://polygon-mainnet.g.alchemy.com/…"
        );
        assert_eq!(redact("http://localhost:8545"), "http://localhost:8545");
        assert_eq!(redact("http://localhost:8545/"), "http://localhost:8545/");
    }
}
