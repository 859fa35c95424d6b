//! Read-side queries over the mirror: market listings for the UI and the
//! per-user stake aggregate folded from bet rows.

use super::{Bet, Market, MarketPhase, MirrorError, MirrorStore};
use crate::chain::Side;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketFilter {
    #[default]
    All,
    Active,
    Resolved,
    Void,
    Expired,
}

impl MarketFilter {
    fn admits(self, phase: MarketPhase) -> bool {
        match self {
            MarketFilter::All => true,
            MarketFilter::Active => phase == MarketPhase::Active,
            MarketFilter::Resolved => phase == MarketPhase::Resolved,
            MarketFilter::Void => phase == MarketPhase::Void,
            MarketFilter::Expired => phase == MarketPhase::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSort {
    #[default]
    Newest,
    Oldest,
    Volume,
    Participants,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketListing {
    #[serde(flatten)]
    pub market: Market,
    pub phase: MarketPhase,
    /// total_yes + total_no
    pub volume: U256,
    /// Distinct bettors, from bet rows.
    pub participants: usize,
}

/// Filtered, sorted market listing. Market ids are chain-assigned and
/// monotonic, so id order is creation order.
pub async fn list_markets(
    store: &dyn MirrorStore,
    filter: MarketFilter,
    sort: MarketSort,
    now_secs: u64,
) -> Result<Vec<MarketListing>, MirrorError> {
    let mut listings = Vec::new();
    for market in store.all_markets().await? {
        let phase = market.phase(now_secs);
        if !filter.admits(phase) {
            continue;
        }
        let bets = store.bets_for_market(market.id).await?;
        let participants = bets.iter().map(|b| b.user).collect::<HashSet<_>>().len();
        listings.push(MarketListing {
            volume: market.total_stake(),
            market,
            phase,
            participants,
        });
    }

    match sort {
        MarketSort::Newest => listings.sort_by(|a, b| b.market.id.cmp(&a.market.id)),
        MarketSort::Oldest => listings.sort_by_key(|l| l.market.id),
        MarketSort::Volume => listings.sort_by(|a, b| {
            b.volume
                .cmp(&a.volume)
                .then_with(|| b.market.id.cmp(&a.market.id))
        }),
        MarketSort::Participants => listings.sort_by(|a, b| {
            b.participants
                .cmp(&a.participants)
                .then_with(|| b.market.id.cmp(&a.market.id))
        }),
    }
    Ok(listings)
}

/// One user's stake in one market, folded from bet rows. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UserStake {
    pub market_id: u64,
    pub yes: U256,
    pub no: U256,
}

impl UserStake {
    pub fn total(&self) -> U256 {
        self.yes.saturating_add(self.no)
    }
}

/// Fold a user's bets into per-market stake totals, ordered by market id.
pub fn aggregate_stakes(bets: &[Bet], user: Address) -> Vec<UserStake> {
    let mut by_market: BTreeMap<u64, UserStake> = BTreeMap::new();
    for bet in bets.iter().filter(|b| b.user == user) {
        let entry = by_market.entry(bet.market_id).or_insert(UserStake {
            market_id: bet.market_id,
            ..UserStake::default()
        });
        match bet.side {
            Side::Yes => entry.yes = entry.yes.saturating_add(bet.amount),
            Side::No => entry.no = entry.no.saturating_add(bet.amount),
        }
    }
    by_market.into_values().collect()
}

/// Stake of `user` in a single market.
pub fn stake_in(bets: &[Bet], market_id: u64, user: Address) -> UserStake {
    aggregate_stakes(bets, user)
        .into_iter()
        .find(|s| s.market_id == market_id)
        .unwrap_or(UserStake {
            market_id,
            ..UserStake::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::WinningSide;
    use crate::mirror::fixtures::{bet, market, resolved};
    use crate::mirror::MemoryMirror;

    const NOW: u64 = 1_000;

    async fn seeded() -> MemoryMirror {
        let mirror = MemoryMirror::new();
        let a = Address::repeat_byte(0xa1);
        let b = Address::repeat_byte(0xb2);
        // 1: active, 2: expired with stake, 3: void, 4: resolved
        mirror.upsert_market(market(1, 5_000, 2, 1)).await.unwrap();
        mirror.upsert_market(market(2, 500, 10, 10)).await.unwrap();
        mirror.upsert_market(market(3, 500, 0, 0)).await.unwrap();
        mirror
            .upsert_market(resolved(4, 3, 1, WinningSide::Yes, 0))
            .await
            .unwrap();

        mirror.append_bet(bet(1, a, Side::Yes, 2, 1)).await.unwrap();
        mirror.append_bet(bet(1, b, Side::No, 1, 2)).await.unwrap();
        mirror.append_bet(bet(2, a, Side::Yes, 10, 3)).await.unwrap();
        mirror.append_bet(bet(2, a, Side::No, 10, 4)).await.unwrap();
        mirror
    }

    fn ids(listings: &[MarketListing]) -> Vec<u64> {
        listings.iter().map(|l| l.market.id).collect()
    }

    #[tokio::test]
    async fn test_filters_partition_markets() {
        let mirror = seeded().await;
        let q = |f| list_markets(&mirror, f, MarketSort::Oldest, NOW);

        assert_eq!(ids(&q(MarketFilter::All).await.unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(ids(&q(MarketFilter::Active).await.unwrap()), vec![1]);
        assert_eq!(ids(&q(MarketFilter::Expired).await.unwrap()), vec![2]);
        assert_eq!(ids(&q(MarketFilter::Void).await.unwrap()), vec![3]);
        assert_eq!(ids(&q(MarketFilter::Resolved).await.unwrap()), vec![4]);
    }

    #[tokio::test]
    async fn test_sorts() {
        let mirror = seeded().await;
        let q = |s| list_markets(&mirror, MarketFilter::All, s, NOW);

        assert_eq!(ids(&q(MarketSort::Newest).await.unwrap()), vec![4, 3, 2, 1]);
        assert_eq!(ids(&q(MarketSort::Volume).await.unwrap()), vec![2, 4, 1, 3]);

        let by_participants = q(MarketSort::Participants).await.unwrap();
        assert_eq!(by_participants[0].market.id, 1);
        assert_eq!(by_participants[0].participants, 2);
        assert_eq!(by_participants[1].market.id, 2);
    }

    #[test]
    fn test_aggregate_folds_bets_per_market() {
        let a = Address::repeat_byte(0xa1);
        let b = Address::repeat_byte(0xb2);
        let bets = vec![
            bet(1, a, Side::Yes, 2, 1),
            bet(1, a, Side::Yes, 3, 2),
            bet(1, a, Side::No, 1, 3),
            bet(1, b, Side::No, 9, 4),
            bet(2, a, Side::No, 4, 5),
        ];
        let stakes = aggregate_stakes(&bets, a);
        assert_eq!(stakes.len(), 2);
        assert_eq!(stakes[0].yes, U256::from(5));
        assert_eq!(stakes[0].no, U256::from(1));
        assert_eq!(stakes[1].total(), U256::from(4));

        assert_eq!(stake_in(&bets, 3, a).total(), U256::ZERO);
    }

    #[test]
    fn test_filter_parses_from_query_string() {
        let f: MarketFilter = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(f, MarketFilter::Expired);
        let s: MarketSort = serde_json::from_str("\"participants\"").unwrap();
        assert_eq!(s, MarketSort::Participants);
    }
}
