//! Wallet seam for the action orchestrators: simulate, then sign and send.
//! Receipt waiting goes through the chain transport, not the wallet.

use crate::actions::ActionError;
use crate::chain::abi;
use crate::chain::transport::redact;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// A contract call to sign and send.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    /// Native value attached (the bet amount for `placeBet`).
    pub value: U256,
}

#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Account that signs and pays for submissions.
    fn sender(&self) -> Address;

    /// Dry-run against latest state. A revert here means nothing is sent.
    async fn simulate(&self, tx: &TxRequest) -> Result<(), ActionError>;

    /// Sign and broadcast. Returns the transaction hash.
    async fn submit(&self, tx: &TxRequest) -> Result<B256, ActionError>;
}

/// Map a wallet/provider error message onto the action taxonomy.
/// Rejection signals differ per wallet; these are the common ones.
pub fn classify_wallet_error(message: &str) -> ActionError {
    let lower = message.to_lowercase();
    if lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("rejected the request")
        || lower.contains("action_rejected")
        || crate::chain::types::mentions_code(&lower, "4001")
    {
        return ActionError::UserCancelled;
    }
    if lower.contains("revert") {
        let reason = abi::revert_reason_from_message(message).unwrap_or_else(|| message.to_string());
        return ActionError::SimulationRevert(reason);
    }
    ActionError::Rpc(crate::chain::RpcError::classify(message))
}

/// Local private-key wallet over an alloy HTTP provider.
pub struct AlloyWallet {
    provider: DynProvider,
    sender: Address,
    request_timeout: Duration,
}

impl AlloyWallet {
    pub async fn connect(
        url: &str,
        private_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, ActionError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|_| ActionError::Validation("invalid private key".to_string()))?;
        let sender = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(url)
            .await
            .map_err(|e| ActionError::Rpc(crate::chain::RpcError::Transport(e.to_string())))?
            .erased();
        info!(sender = %sender, url = %redact(url), "wallet ready");
        Ok(Self {
            provider,
            sender,
            request_timeout,
        })
    }

    fn request(&self, tx: &TxRequest) -> TransactionRequest {
        TransactionRequest::default()
            .from(self.sender)
            .to(tx.to)
            .value(tx.value)
            .input(TransactionInput::new(tx.data.clone()))
    }
}

#[async_trait]
impl TxSubmitter for AlloyWallet {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn simulate(&self, tx: &TxRequest) -> Result<(), ActionError> {
        let fut = self.provider.call(self.request(tx));
        match tokio::time::timeout(self.request_timeout, fut).await {
            Err(_) => Err(ActionError::Timeout(self.request_timeout)),
            Ok(Err(e)) => Err(classify_wallet_error(&e.to_string())),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn submit(&self, tx: &TxRequest) -> Result<B256, ActionError> {
        let fut = self.provider.send_transaction(self.request(tx));
        match tokio::time::timeout(self.request_timeout, fut).await {
            Err(_) => Err(ActionError::Timeout(self.request_timeout)),
            Ok(Err(e)) => Err(classify_wallet_error(&e.to_string())),
            Ok(Ok(pending)) => {
                let hash = *pending.tx_hash();
                debug!(tx = %hash, "transaction broadcast");
                Ok(hash)
            }
        }
    }
}
