//! Receipt verification: the anti-spoofing gate in front of the reward
//! ledger. A receipt is only trusted once it is fetched from our own RPC,
//! reports success, and names the claimed sender.

use crate::chain::transport::ChainTransport;
use crate::chain::types::{RpcError, TxReceipt};
use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("receipt for {tx_hash} not found after {polls} polls")]
    NotFound { tx_hash: B256, polls: u32 },
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    #[error("sender mismatch: transaction sent by {actual}, claimed by {expected}")]
    SenderMismatch { expected: Address, actual: Address },
    #[error("transaction targets {actual:?}, expected {expected}")]
    TargetMismatch {
        expected: Address,
        actual: Option<Address>,
    },
    #[error("no rpc configured for chain {0}")]
    UnsupportedChain(u64),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Polling schedule for receipt lookups.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolicy {
    /// Give the tx time to propagate before the first lookup.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            max_polls: 10,
        }
    }
}

/// A receipt that passed the success check.
#[derive(Debug, Clone)]
pub struct VerifiedReceipt {
    pub sender: Address,
    pub receipt: TxReceipt,
}

/// Verifies receipts against one transport per supported chain id.
pub struct ReceiptVerifier {
    transports: HashMap<u64, Arc<dyn ChainTransport>>,
    policy: ReceiptPolicy,
}

impl ReceiptVerifier {
    pub fn new(policy: ReceiptPolicy) -> Self {
        Self {
            transports: HashMap::new(),
            policy,
        }
    }

    pub fn with_chain(mut self, chain_id: u64, transport: Arc<dyn ChainTransport>) -> Self {
        self.transports.insert(chain_id, transport);
        self
    }

    pub fn supports(&self, chain_id: u64) -> bool {
        self.transports.contains_key(&chain_id)
    }

    /// Fetch the receipt and confirm it succeeded. Returns the sender so the
    /// caller can compare it against the wallet it is about to credit.
    pub async fn verify(
        &self,
        tx_hash: B256,
        chain_id: u64,
    ) -> Result<VerifiedReceipt, VerificationError> {
        let transport = self
            .transports
            .get(&chain_id)
            .ok_or(VerificationError::UnsupportedChain(chain_id))?;

        tokio::time::sleep(self.policy.initial_delay).await;

        let mut last_error: Option<RpcError> = None;
        for poll in 1..=self.policy.max_polls {
            match transport.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.success {
                        warn!(tx = %tx_hash, chain_id, "receipt reports revert");
                        return Err(VerificationError::Reverted { tx_hash });
                    }
                    debug!(tx = %tx_hash, poll, sender = %receipt.from, "receipt verified");
                    return Ok(VerifiedReceipt {
                        sender: receipt.from,
                        receipt,
                    });
                }
                Ok(None) => {
                    debug!(tx = %tx_hash, poll, "receipt not found yet");
                }
                Err(e) if e.is_transient() => {
                    debug!(tx = %tx_hash, poll, error = %e, "receipt lookup failed, will poll again");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
            if poll < self.policy.max_polls {
                tokio::time::sleep(self.policy.poll_interval).await;
            }
        }

        if let Some(e) = last_error {
            info!(tx = %tx_hash, error = %e, "receipt polling ended with rpc errors");
        }
        Err(VerificationError::NotFound {
            tx_hash,
            polls: self.policy.max_polls,
        })
    }

    /// `verify` plus the sender (and optionally target contract) check.
    pub async fn verify_sender(
        &self,
        tx_hash: B256,
        chain_id: u64,
        wallet: Address,
        expected_target: Option<Address>,
    ) -> Result<VerifiedReceipt, VerificationError> {
        let verified = self.verify(tx_hash, chain_id).await?;
        if verified.sender != wallet {
            warn!(
                tx = %tx_hash,
                claimed = %wallet,
                actual = %verified.sender,
                "receipt sender does not match claiming wallet"
            );
            return Err(VerificationError::SenderMismatch {
                expected: wallet,
                actual: verified.sender,
            });
        }
        if let Some(target) = expected_target {
            if verified.receipt.to != Some(target) {
                return Err(VerificationError::TargetMismatch {
                    expected: target,
                    actual: verified.receipt.to,
                });
            }
        }
        Ok(verified)
    }
}

/// Poll for a receipt until it appears or `timeout` elapses. Used by the
/// orchestrators to wait for their own submissions.
pub async fn wait_for_receipt(
    transport: &dyn ChainTransport,
    tx_hash: B256,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<TxReceipt, RpcError> {
    let deadline = Instant::now() + timeout;
    loop {
        match transport.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                debug!(tx = %tx_hash, error = %e, "receipt poll failed");
            }
            Err(e) => return Err(e),
        }
        if Instant::now() + poll_interval > deadline {
            return Err(RpcError::Timeout(timeout));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fake::FakeChain;

    const CHAIN_ID: u64 = 84532;

    fn verifier(chain: Arc<FakeChain>) -> ReceiptVerifier {
        ReceiptVerifier::new(ReceiptPolicy {
            initial_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            max_polls: 4,
        })
        .with_chain(CHAIN_ID, chain)
    }

    #[tokio::test(start_paused = true)]
    async fn test_verifies_successful_receipt() {
        let chain = Arc::new(FakeChain::new());
        let sender = Address::repeat_byte(0x42);
        let hash = chain.insert_receipt(sender, true);

        let verified = verifier(chain)
            .verify_sender(hash, CHAIN_ID, sender, None)
            .await
            .unwrap();
        assert_eq!(verified.sender, sender);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_is_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = chain.insert_receipt(Address::repeat_byte(0x42), false);

        let err = verifier(chain).verify(hash, CHAIN_ID).await.unwrap_err();
        assert_eq!(err, VerificationError::Reverted { tx_hash: hash });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_mismatch_is_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = chain.insert_receipt(Address::repeat_byte(0x42), true);

        let err = verifier(chain)
            .verify_sender(hash, CHAIN_ID, Address::repeat_byte(0x99), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::SenderMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_hash_times_out_bounded() {
        let chain = Arc::new(FakeChain::new());
        let start = Instant::now();

        let err = verifier(chain)
            .verify(B256::repeat_byte(0x07), CHAIN_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::NotFound { polls: 4, .. }));
        // 500ms initial delay + 3 gaps of 250ms
        assert!(start.elapsed() >= Duration::from_millis(1250));
        assert!(start.elapsed() < Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_chain() {
        let chain = Arc::new(FakeChain::new());
        let err = verifier(chain).verify(B256::ZERO, 1).await.unwrap_err();
        assert_eq!(err, VerificationError::UnsupportedChain(1));
    }
}
