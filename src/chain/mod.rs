//! Chain access for the prediction-market contract.
//!
//! Architecture:
//! - `ChainTransport`: one RPC endpoint (alloy HTTP provider in production)
//! - `ChainReader`: typed contract reads with rate-limit backoff and an
//!   optional fallback endpoint for correctness-critical single reads
//! - `ReceiptVerifier`: fetches receipts and checks status + sender before
//!   anything downstream trusts a transaction hash
//! - `events`: typed decoder for the contract's logs
//! - `abi`: selectors, topics and word-level encoding

pub mod abi;
pub mod events;
pub mod reader;
pub mod receipt;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use events::MarketEvent;
pub use reader::{ChainReader, ReadCall, ReadMode, RetryPolicy};
pub use receipt::{ReceiptPolicy, ReceiptVerifier, VerificationError, VerifiedReceipt};
pub use transport::{AlloyTransport, ChainTransport};
pub use types::{MarketSnapshot, RawLog, RpcError, Side, TxReceipt, WinningSide};
