//! Chain-side value types shared by the reader, the receipt verifier and the
//! event decoder.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by chain reads. Rate limits are the only retryable class.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("rpc rate limited: {0}")]
    RateLimited(String),
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc request timed out after {0:?}")]
    Timeout(Duration),
    #[error("call reverted: {0}")]
    Reverted(String),
    #[error("failed to decode return data: {0}")]
    Decode(String),
    #[error("rpc still failing after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Whether `code` appears as a standalone number right after `code`,
/// `error` or `status` (separators `:`, `=`, quotes and spaces allowed).
/// `lower` must already be lowercased.
pub(crate) fn mentions_code(lower: &str, code: &str) -> bool {
    let bytes = lower.as_bytes();
    lower.match_indices(code).any(|(at, _)| {
        let end = at + code.len();
        if bytes.get(end).is_some_and(|b| b.is_ascii_digit()) {
            return false;
        }
        if at > 0 && bytes[at - 1].is_ascii_digit() {
            return false;
        }
        let before = lower[..at].trim_end_matches([' ', ':', '=', '"']);
        ["code", "error", "status"].iter().any(|w| before.ends_with(w))
    })
}

impl RpcError {
    /// Classify a provider error message. Mirrors the string checks the
    /// providers force on us: there is no structured rate-limit code.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if mentions_code(&lower, "429")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
            || lower.contains("rate-limit")
            || (lower.contains("exceeded") && lower.contains("limit"))
            || lower.contains("compute units")
        {
            RpcError::RateLimited(message)
        } else if lower.contains("execution reverted") || lower.contains("revert") {
            RpcError::Reverted(message)
        } else {
            RpcError::Transport(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcError::RateLimited(_))
    }

    /// Worth trying again later (next poll, next pass, fallback endpoint).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::RateLimited(_)
                | RpcError::Transport(_)
                | RpcError::Timeout(_)
                | RpcError::Exhausted { .. }
        )
    }
}

/// Bet side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_u8(self) -> u8 {
        match self {
            Side::Yes => 1,
            Side::No => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Side::Yes),
            2 => Some(Side::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "yes"),
            Side::No => write!(f, "no"),
        }
    }
}

/// Outcome recorded on a market. `Unset` until resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinningSide {
    #[default]
    Unset,
    Yes,
    No,
    Tie,
}

impl WinningSide {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(WinningSide::Unset),
            1 => Some(WinningSide::Yes),
            2 => Some(WinningSide::No),
            3 => Some(WinningSide::Tie),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            WinningSide::Unset => 0,
            WinningSide::Yes => 1,
            WinningSide::No => 2,
            WinningSide::Tie => 3,
        }
    }

    pub fn is_set(self) -> bool {
        self != WinningSide::Unset
    }
}

impl std::fmt::Display for WinningSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WinningSide::Unset => write!(f, "unset"),
            WinningSide::Yes => write!(f, "yes"),
            WinningSide::No => write!(f, "no"),
            WinningSide::Tie => write!(f, "tie"),
        }
    }
}

/// Authoritative market state as read from the contract in one resync.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub id: u64,
    pub question: String,
    pub creator: Address,
    pub end_time: u64,
    pub resolved: bool,
    pub winning_side: WinningSide,
    pub total_yes: U256,
    pub total_no: U256,
    pub fee_amount: U256,
    pub distributable_pool: U256,
    /// |yes - no| / (yes + no), in basis points.
    pub imbalance_bps: u32,
    pub bet_locked: bool,
}

/// A log entry as carried in a receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Engine-owned view of a transaction receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub from: Address,
    pub to: Option<Address>,
    pub block_number: Option<u64>,
    pub logs: Vec<RawLog>,
}
