//! Pro-rata payout math for resolved markets.
//!
//! `claimable = floor(distributable_pool × winner_stake / winner_pool)`,
//! integer arithmetic over U256 only. A tie refunds from the full pool:
//! both sides count as winners. An existing claim row forces zero.

use crate::chain::WinningSide;
use crate::mirror::query::{aggregate_stakes, stake_in, UserStake};
use crate::mirror::{Market, MirrorError, MirrorStore};
use alloy::primitives::{Address, I256, U256};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("market {0} not found in mirror")]
    UnknownMarket(u64),
    #[error("arithmetic overflow computing payout for market {0}")]
    Overflow(u64),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Winning-side totals the formula divides over.
fn winner_totals(
    side: WinningSide,
    total_yes: U256,
    total_no: U256,
    stake: &UserStake,
) -> Option<(U256, U256)> {
    match side {
        WinningSide::Yes => Some((total_yes, stake.yes)),
        WinningSide::No => Some((total_no, stake.no)),
        WinningSide::Tie => Some((
            total_yes.checked_add(total_no)?,
            stake.yes.checked_add(stake.no)?,
        )),
        WinningSide::Unset => None,
    }
}

/// Pure payout formula. Zero for unresolved markets or users with no stake on
/// the winning side.
pub fn compute_claimable(market: &Market, stake: &UserStake) -> Result<U256, SettlementError> {
    if !market.resolved || !market.winning_side.is_set() {
        return Ok(U256::ZERO);
    }
    let Some((pool, winner_stake)) =
        winner_totals(market.winning_side, market.total_yes, market.total_no, stake)
    else {
        return Err(SettlementError::Overflow(market.id));
    };
    if pool.is_zero() || winner_stake.is_zero() {
        return Ok(U256::ZERO);
    }
    let numerator = market
        .distributable_pool
        .checked_mul(winner_stake)
        .ok_or(SettlementError::Overflow(market.id))?;
    Ok(numerator / pool)
}

/// Display-only profit: claimable minus everything the user staked.
pub fn net(claimable: U256, stake: &UserStake) -> I256 {
    let paid = I256::try_from(stake.total()).unwrap_or(I256::MAX);
    let got = I256::try_from(claimable).unwrap_or(I256::MAX);
    got.saturating_sub(paid)
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimableView {
    pub market_id: u64,
    pub user: Address,
    pub claimable: U256,
    /// Informational; the chain performs the real transfer.
    pub net: I256,
    pub claimed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub market_id: u64,
    pub question: String,
    pub resolved: bool,
    pub winning_side: WinningSide,
    pub yes: U256,
    pub no: U256,
    pub claimable: U256,
    pub claimed: bool,
}

/// Claimable payouts read from the mirror.
#[derive(Clone)]
pub struct SettlementCalculator {
    mirror: Arc<dyn MirrorStore>,
}

impl SettlementCalculator {
    pub fn new(mirror: Arc<dyn MirrorStore>) -> Self {
        Self { mirror }
    }

    fn view(
        market: &Market,
        user: Address,
        stake: &UserStake,
        claimed: bool,
    ) -> Result<ClaimableView, SettlementError> {
        let claimable = if claimed {
            U256::ZERO
        } else {
            compute_claimable(market, stake)?
        };
        Ok(ClaimableView {
            market_id: market.id,
            user,
            claimable,
            net: net(claimable, stake),
            claimed,
        })
    }

    pub async fn get_claimable(
        &self,
        market_id: u64,
        user: Address,
    ) -> Result<ClaimableView, SettlementError> {
        let market = self
            .mirror
            .get_market(market_id)
            .await?
            .ok_or(SettlementError::UnknownMarket(market_id))?;
        let bets = self.mirror.bets_for_market(market_id).await?;
        let stake = stake_in(&bets, market_id, user);
        let claimed = self.mirror.has_claim(market_id, user).await?;
        Self::view(&market, user, &stake, claimed)
    }

    /// Every market the user has staked in, with claimable amounts.
    pub async fn user_positions(&self, user: Address) -> Result<Vec<Position>, SettlementError> {
        let bets = self.mirror.bets_for_user(user).await?;
        let mut positions = Vec::new();
        for stake in aggregate_stakes(&bets, user) {
            let Some(market) = self.mirror.get_market(stake.market_id).await? else {
                continue;
            };
            let claimed = self.mirror.has_claim(market.id, user).await?;
            let view = Self::view(&market, user, &stake, claimed)?;
            positions.push(Position {
                market_id: market.id,
                question: market.question.clone(),
                resolved: market.resolved,
                winning_side: market.winning_side,
                yes: stake.yes,
                no: stake.no,
                claimable: view.claimable,
                claimed,
            });
        }
        Ok(positions)
    }

    /// Resolved markets where `user` has something left to claim.
    pub async fn pending_claims(&self, user: Address) -> Result<Vec<ClaimableView>, SettlementError> {
        let bets = self.mirror.bets_for_user(user).await?;
        let mut pending = Vec::new();
        for stake in aggregate_stakes(&bets, user) {
            let Some(market) = self.mirror.get_market(stake.market_id).await? else {
                continue;
            };
            if !market.resolved {
                continue;
            }
            let claimed = self.mirror.has_claim(market.id, user).await?;
            let view = Self::view(&market, user, &stake, claimed)?;
            if !view.claimable.is_zero() {
                pending.push(view);
            }
        }
        Ok(pending)
    }
}
