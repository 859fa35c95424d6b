//! In-process mirror backed by DashMap. Used for single-node deployments
//! without Valkey and by the test suites.

use super::{Bet, Claim, Market, MirrorError, MirrorStore, UpsertOutcome};
use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Default)]
pub struct MemoryMirror {
    /// market id → row
    markets: Arc<DashMap<u64, Market>>,
    /// market id → bets in insertion order
    bets: Arc<DashMap<u64, Vec<Bet>>>,
    /// (market id, user) → claim
    claims: Arc<DashMap<(u64, Address), Claim>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn upsert_market(&self, market: Market) -> Result<UpsertOutcome, MirrorError> {
        // The entry lock makes the compare and the replace one step.
        match self.markets.entry(market.id) {
            Entry::Vacant(slot) => {
                slot.insert(market);
                Ok(UpsertOutcome::Inserted)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().superseded_by(&market) {
                    slot.insert(market);
                    Ok(UpsertOutcome::Replaced)
                } else {
                    debug!(market_id = market.id, "dropping stale market write");
                    Ok(UpsertOutcome::Stale)
                }
            }
        }
    }

    async fn get_market(&self, id: u64) -> Result<Option<Market>, MirrorError> {
        Ok(self.markets.get(&id).map(|m| m.clone()))
    }

    async fn all_markets(&self) -> Result<Vec<Market>, MirrorError> {
        let mut markets: Vec<Market> = self.markets.iter().map(|e| e.value().clone()).collect();
        markets.sort_by_key(|m| m.id);
        Ok(markets)
    }

    async fn market_ids(&self) -> Result<Vec<u64>, MirrorError> {
        let mut ids: Vec<u64> = self.markets.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn append_bet(&self, bet: Bet) -> Result<bool, MirrorError> {
        let mut bets = self.bets.entry(bet.market_id).or_default();
        if bets.iter().any(|b| b.tx_hash == bet.tx_hash && b.user == bet.user) {
            return Ok(false);
        }
        bets.push(bet);
        Ok(true)
    }

    async fn bets_for_market(&self, market_id: u64) -> Result<Vec<Bet>, MirrorError> {
        Ok(self
            .bets
            .get(&market_id)
            .map(|b| b.clone())
            .unwrap_or_default())
    }

    async fn bets_for_user(&self, user: Address) -> Result<Vec<Bet>, MirrorError> {
        let mut out: Vec<Bet> = self
            .bets
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|b| b.user == user)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|b| (b.market_id, b.created_at));
        Ok(out)
    }

    async fn append_claim(&self, claim: Claim) -> Result<bool, MirrorError> {
        match self.claims.entry((claim.market_id, claim.user)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(claim);
                Ok(true)
            }
        }
    }

    async fn has_claim(&self, market_id: u64, user: Address) -> Result<bool, MirrorError> {
        Ok(self.claims.contains_key(&(market_id, user)))
    }

    async fn claims_for_user(&self, user: Address) -> Result<Vec<Claim>, MirrorError> {
        let mut out: Vec<Claim> = self
            .claims
            .iter()
            .filter(|e| e.key().1 == user)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|c| c.market_id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Side;
    use crate::mirror::fixtures::{bet, market};
    use alloy::primitives::{B256, U256};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_last_write_wins() {
        let mirror = MemoryMirror::new();
        let newer = market(1, 10, 5, 0);
        let mut older = market(1, 10, 2, 0);
        older.last_synced_at = newer.last_synced_at - Duration::seconds(10);

        assert_eq!(mirror.upsert_market(newer.clone()).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(mirror.upsert_market(older).await.unwrap(), UpsertOutcome::Stale);
        assert_eq!(mirror.get_market(1).await.unwrap().unwrap().total_yes, U256::from(5));
    }

    #[tokio::test]
    async fn test_confirmed_replaces_provisional_even_if_older() {
        let mirror = MemoryMirror::new();
        let mut provisional = market(1, 10, 9, 0);
        provisional.provisional = true;
        let mut confirmed = market(1, 10, 7, 0);
        confirmed.last_synced_at = provisional.last_synced_at - Duration::seconds(1);

        mirror.upsert_market(provisional).await.unwrap();
        assert_eq!(mirror.upsert_market(confirmed).await.unwrap(), UpsertOutcome::Replaced);
        let row = mirror.get_market(1).await.unwrap().unwrap();
        assert!(!row.provisional);
        assert_eq!(row.total_yes, U256::from(7));
    }

    #[tokio::test]
    async fn test_bets_dedupe_by_tx_hash() {
        let mirror = MemoryMirror::new();
        let user = Address::repeat_byte(0x11);
        assert!(mirror.append_bet(bet(1, user, Side::Yes, 5, 0xaa)).await.unwrap());
        assert!(!mirror.append_bet(bet(1, user, Side::Yes, 5, 0xaa)).await.unwrap());
        assert!(mirror.append_bet(bet(1, user, Side::No, 2, 0xab)).await.unwrap());
        assert!(mirror.append_bet(bet(2, user, Side::No, 1, 0xac)).await.unwrap());

        assert_eq!(mirror.bets_for_market(1).await.unwrap().len(), 2);
        assert_eq!(mirror.bets_for_user(user).await.unwrap().len(), 3);
        assert!(mirror.bets_for_user(Address::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_claim_per_market_user() {
        let mirror = MemoryMirror::new();
        let user = Address::repeat_byte(0x11);
        let claim = Claim {
            market_id: 3,
            user,
            payout: U256::from(4),
            tx_hash: B256::repeat_byte(1),
            created_at: Utc::now(),
        };
        assert!(mirror.append_claim(claim.clone()).await.unwrap());
        let mut again = claim.clone();
        again.tx_hash = B256::repeat_byte(2);
        assert!(!mirror.append_claim(again).await.unwrap());

        assert!(mirror.has_claim(3, user).await.unwrap());
        assert!(!mirror.has_claim(4, user).await.unwrap());
        assert_eq!(mirror.claims_for_user(user).await.unwrap(), vec![claim]);
    }

    #[tokio::test]
    async fn test_ids_are_sorted() {
        let mirror = MemoryMirror::new();
        for id in [5, 1, 3] {
            mirror.upsert_market(market(id, 10, 0, 0)).await.unwrap();
        }
        assert_eq!(mirror.market_ids().await.unwrap(), vec![1, 3, 5]);
    }
}
