//! Off-chain mirror of market, bet and claim state, read by the UI.
//!
//! Data model:
//!   markets  → one row per market id, full-row replace on upsert,
//!              last-write-wins by `last_synced_at`
//!   bets     → append-only, many per (market, user), deduped by tx hash
//!   claims   → append-only, at most one per (market, user); its presence
//!              means the user has already withdrawn
//!
//! Market rows written straight after a local transaction are marked
//! `provisional`; the next confirmed resync always replaces them.

pub mod memory;
pub mod query;
pub mod valkey;

use crate::chain::{MarketSnapshot, Side, WinningSide};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryMirror;
pub use query::{list_markets, MarketFilter, MarketListing, MarketSort, UserStake};
pub use valkey::ValkeyMirror;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("valkey error: {0}")]
    Valkey(#[from] redis::RedisError),
    #[error("failed to (de)serialize mirror row: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Lifecycle phase of a market as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    /// Open for bets.
    Active,
    /// Ended with stake, waiting for someone to resolve it.
    Expired,
    /// Ended with no stake; nothing to resolve.
    Void,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: u64,
    pub question: String,
    pub creator: Address,
    /// Unix seconds. Immutable after creation.
    pub end_time: u64,
    pub resolved: bool,
    pub winning_side: WinningSide,
    pub total_yes: U256,
    pub total_no: U256,
    pub fee_amount: U256,
    pub distributable_pool: U256,
    pub imbalance_bps: u32,
    pub bet_locked: bool,
    pub last_synced_at: DateTime<Utc>,
    /// Written from decoded logs, not yet confirmed by a resync.
    pub provisional: bool,
}

impl Market {
    pub fn from_snapshot(snapshot: MarketSnapshot, synced_at: DateTime<Utc>) -> Self {
        Self {
            id: snapshot.id,
            question: snapshot.question,
            creator: snapshot.creator,
            end_time: snapshot.end_time,
            resolved: snapshot.resolved,
            winning_side: snapshot.winning_side,
            total_yes: snapshot.total_yes,
            total_no: snapshot.total_no,
            fee_amount: snapshot.fee_amount,
            distributable_pool: snapshot.distributable_pool,
            imbalance_bps: snapshot.imbalance_bps,
            bet_locked: snapshot.bet_locked,
            last_synced_at: synced_at,
            provisional: false,
        }
    }

    /// Placeholder for a market we only know about from its creation log.
    pub fn placeholder(id: u64, question: String, creator: Address, end_time: u64) -> Self {
        Self {
            id,
            question,
            creator,
            end_time,
            resolved: false,
            winning_side: WinningSide::Unset,
            total_yes: U256::ZERO,
            total_no: U256::ZERO,
            fee_amount: U256::ZERO,
            distributable_pool: U256::ZERO,
            imbalance_bps: 0,
            bet_locked: false,
            last_synced_at: Utc::now(),
            provisional: true,
        }
    }

    pub fn total_stake(&self) -> U256 {
        self.total_yes.saturating_add(self.total_no)
    }

    pub fn has_ended(&self, now_secs: u64) -> bool {
        now_secs >= self.end_time
    }

    pub fn phase(&self, now_secs: u64) -> MarketPhase {
        if self.resolved {
            MarketPhase::Resolved
        } else if !self.has_ended(now_secs) {
            MarketPhase::Active
        } else if self.total_stake().is_zero() {
            MarketPhase::Void
        } else {
            MarketPhase::Expired
        }
    }

    /// Ended, unresolved and holding stake: needs a resolve call and a resync.
    pub fn needs_resolution(&self, now_secs: u64) -> bool {
        self.phase(now_secs) == MarketPhase::Expired
    }

    /// `distributable_pool == total_yes + total_no - fee_amount` once resolved,
    /// and the pool never exceeds total stake.
    pub fn pool_is_consistent(&self) -> bool {
        let total = self.total_stake();
        if self.distributable_pool > total {
            return false;
        }
        if self.resolved {
            return self.winning_side.is_set()
                && total.checked_sub(self.fee_amount) == Some(self.distributable_pool);
        }
        true
    }

    /// Fields that differ between two rows for the same market, ignoring
    /// bookkeeping columns. Empty when the mirror already matches chain.
    pub fn diff(&self, other: &Market) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.question != other.question {
            fields.push("question");
        }
        if self.end_time != other.end_time {
            fields.push("end_time");
        }
        if self.resolved != other.resolved {
            fields.push("resolved");
        }
        if self.winning_side != other.winning_side {
            fields.push("winning_side");
        }
        if self.total_yes != other.total_yes {
            fields.push("total_yes");
        }
        if self.total_no != other.total_no {
            fields.push("total_no");
        }
        if self.fee_amount != other.fee_amount {
            fields.push("fee_amount");
        }
        if self.distributable_pool != other.distributable_pool {
            fields.push("distributable_pool");
        }
        if self.bet_locked != other.bet_locked {
            fields.push("bet_locked");
        }
        fields
    }

    /// Whether `incoming` should replace `self` under last-write-wins.
    /// A confirmed row always displaces a provisional one; a provisional row
    /// displaces a confirmed one only when strictly newer.
    pub fn superseded_by(&self, incoming: &Market) -> bool {
        match (self.provisional, incoming.provisional) {
            (true, false) => true,
            (false, true) => incoming.last_synced_at > self.last_synced_at,
            _ => incoming.last_synced_at >= self.last_synced_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub market_id: u64,
    pub user: Address,
    pub side: Side,
    pub amount: U256,
    pub tx_hash: B256,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub market_id: u64,
    pub user: Address,
    pub payout: U256,
    pub tx_hash: B256,
    pub created_at: DateTime<Utc>,
}

/// Result of an upsert under last-write-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Incoming row was older than the stored one and was dropped.
    Stale,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn upsert_market(&self, market: Market) -> Result<UpsertOutcome, MirrorError>;

    async fn get_market(&self, id: u64) -> Result<Option<Market>, MirrorError>;

    async fn all_markets(&self) -> Result<Vec<Market>, MirrorError>;

    async fn market_ids(&self) -> Result<Vec<u64>, MirrorError>;

    /// Append a bet. Returns false if a bet with the same tx hash is already
    /// stored for the market.
    async fn append_bet(&self, bet: Bet) -> Result<bool, MirrorError>;

    async fn bets_for_market(&self, market_id: u64) -> Result<Vec<Bet>, MirrorError>;

    async fn bets_for_user(&self, user: Address) -> Result<Vec<Bet>, MirrorError>;

    /// Append a claim. Returns false if (market, user) already has one.
    async fn append_claim(&self, claim: Claim) -> Result<bool, MirrorError>;

    async fn has_claim(&self, market_id: u64, user: Address) -> Result<bool, MirrorError>;

    async fn claims_for_user(&self, user: Address) -> Result<Vec<Claim>, MirrorError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn market(id: u64, end_time: u64, yes: u64, no: u64) -> Market {
        Market {
            id,
            question: format!("Question {id}?"),
            creator: Address::repeat_byte(0xcc),
            end_time,
            resolved: false,
            winning_side: WinningSide::Unset,
            total_yes: U256::from(yes),
            total_no: U256::from(no),
            fee_amount: U256::ZERO,
            distributable_pool: U256::ZERO,
            imbalance_bps: 0,
            bet_locked: false,
            last_synced_at: Utc::now(),
            provisional: false,
        }
    }

    pub fn resolved(id: u64, yes: u64, no: u64, side: WinningSide, fee: u64) -> Market {
        let mut m = market(id, 1, yes, no);
        m.resolved = true;
        m.winning_side = side;
        m.fee_amount = U256::from(fee);
        m.distributable_pool = U256::from(yes + no - fee);
        m
    }

    pub fn bet(market_id: u64, user: Address, side: Side, amount: u64, tx: u8) -> Bet {
        Bet {
            market_id,
            user,
            side,
            amount: U256::from(amount),
            tx_hash: B256::repeat_byte(tx),
            created_at: Utc::now(),
        }
    }
}
