//! Action orchestrators: create, bet, resolve, claim.
//!
//! Every action runs the same pipeline:
//!   validate → simulate → submit → wait for receipt → decode events →
//!   provisional mirror write → reward grant → resync + reconcile request
//!
//! Ids and amounts written to the mirror come from the decoded receipt logs,
//! never from what the caller asked for. Provisional rows are replaced by the
//! resync that follows; if that resync fails the reconciler or the periodic
//! pass picks it up.

pub mod wallet;

use crate::chain::events::decode_receipt;
use crate::chain::receipt::wait_for_receipt;
use crate::chain::{abi, ChainReader, MarketEvent, RpcError, Side, TxReceipt};
use crate::mirror::{Bet, Claim, Market, MirrorError, MirrorStore};
use crate::reconcile::Reconciler;
use crate::rewards::{RewardCategory, RewardGateway, RewardPolicy};
use crate::settlement::{SettlementCalculator, SettlementError};
use crate::sync::SyncEngine;
use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use wallet::{AlloyWallet, TxRequest, TxSubmitter};

#[derive(Error, Debug)]
pub enum ActionError {
    /// Dismissed at the wallet prompt. Nothing was sent.
    #[error("cancelled by user")]
    UserCancelled,
    /// Simulation predicted a revert. Nothing was sent.
    #[error("transaction would revert: {0}")]
    SimulationRevert(String),
    /// Mined, but failed. No mirror state was written.
    #[error("transaction {tx_hash} reverted on chain: {reason}")]
    OnChainRevert { tx_hash: B256, reason: String },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<SettlementError> for ActionError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Mirror(m) => ActionError::Mirror(m),
            other => ActionError::Validation(other.to_string()),
        }
    }
}

impl From<crate::sync::SyncError> for ActionError {
    fn from(e: crate::sync::SyncError) -> Self {
        match e {
            crate::sync::SyncError::Rpc(r) => ActionError::Rpc(r),
            crate::sync::SyncError::Mirror(m) => ActionError::Mirror(m),
        }
    }
}

/// User-visible progress of the orchestrator's current action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActionStatus {
    Idle,
    Submitting,
    Confirming,
    Done { tx_hash: B256 },
    Failed { reason: String },
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Idle => write!(f, "idle"),
            ActionStatus::Submitting => write!(f, "submitting"),
            ActionStatus::Confirming => write!(f, "confirming"),
            ActionStatus::Done { tx_hash } => write!(f, "done ({tx_hash})"),
            ActionStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateMarket,
    PlaceBet,
    Resolve,
    Claim,
}

impl ActionKind {
    fn category(self) -> RewardCategory {
        match self {
            ActionKind::CreateMarket => RewardCategory::CreateMarket,
            ActionKind::PlaceBet => RewardCategory::PlaceBet,
            ActionKind::Resolve => RewardCategory::ResolveMarket,
            ActionKind::Claim => RewardCategory::Claim,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub chain_id: u64,
    /// Per-user stake cap per market. Zero disables the cap.
    pub max_bet_per_user: U256,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub max_question_len: usize,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub reward_policy: RewardPolicy,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            chain_id: 84532,
            max_bet_per_user: U256::ZERO,
            min_duration_secs: 300,
            max_duration_secs: 90 * 24 * 3600,
            max_question_len: 280,
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            reward_policy: RewardPolicy::default(),
        }
    }
}

/// Result of a confirmed action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReceipt {
    pub action: ActionKind,
    pub tx_hash: B256,
    /// `None` when a create receipt carried no `MarketCreated` log; the
    /// market shows up once the next backfill or resync reaches it.
    pub market_id: Option<u64>,
    /// New reward total when a confirm-first grant went through.
    pub reward_total: Option<u64>,
    #[serde(skip)]
    pub events: Vec<MarketEvent>,
}

/// Per-market result of `claim_all`.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimAttempt {
    pub market_id: u64,
    pub tx_hash: Option<B256>,
    pub error: Option<String>,
}

pub struct ActionOrchestrator {
    wallet: Arc<dyn TxSubmitter>,
    reader: Arc<ChainReader>,
    mirror: Arc<dyn MirrorStore>,
    sync: Arc<SyncEngine>,
    settlement: SettlementCalculator,
    reconciler: Option<Arc<Reconciler>>,
    rewards: Option<Arc<RewardGateway>>,
    settings: ActionSettings,
    status: watch::Sender<ActionStatus>,
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl ActionOrchestrator {
    pub fn new(
        wallet: Arc<dyn TxSubmitter>,
        sync: Arc<SyncEngine>,
        reconciler: Option<Arc<Reconciler>>,
        rewards: Option<Arc<RewardGateway>>,
        settings: ActionSettings,
    ) -> Self {
        let (status, _) = watch::channel(ActionStatus::Idle);
        let mirror = sync.mirror();
        Self {
            wallet,
            reader: sync.reader(),
            settlement: SettlementCalculator::new(mirror.clone()),
            mirror,
            sync,
            reconciler,
            rewards,
            settings,
            status,
        }
    }

    pub fn sender(&self) -> Address {
        self.wallet.sender()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ActionStatus {
        self.status.borrow().clone()
    }

    fn set_status(&self, status: ActionStatus) {
        debug!(status = %status, "action status");
        self.status.send_replace(status);
    }

    // ─── Actions ────────────────────────────────────────────────────────────

    pub async fn create_market(
        &self,
        question: &str,
        duration_secs: u64,
    ) -> Result<ActionReceipt, ActionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ActionError::Validation("question must not be empty".into()));
        }
        if question.chars().count() > self.settings.max_question_len {
            return Err(ActionError::Validation(format!(
                "question longer than {} characters",
                self.settings.max_question_len
            )));
        }
        if duration_secs < self.settings.min_duration_secs
            || duration_secs > self.settings.max_duration_secs
        {
            return Err(ActionError::Validation(format!(
                "duration must be between {} and {} seconds",
                self.settings.min_duration_secs, self.settings.max_duration_secs
            )));
        }

        let tx = self.request(abi::create_market_call(question, duration_secs), U256::ZERO);
        let (receipt, events) = self.execute(ActionKind::CreateMarket, &tx).await?;

        let created = events.iter().find_map(|e| match e {
            MarketEvent::MarketCreated {
                market_id,
                creator,
                question,
                end_time,
            } => Some(Market::placeholder(*market_id, question.clone(), *creator, *end_time)),
            _ => None,
        });
        let market_id = match created {
            Some(placeholder) => {
                let id = placeholder.id;
                self.mirror.upsert_market(placeholder).await?;
                self.converge(id).await;
                Some(id)
            }
            None => {
                warn!(tx = %receipt.tx_hash, "create receipt carried no MarketCreated log, id pending");
                if let Err(e) = self.sync.backfill_from_mirror().await {
                    warn!(error = %e, "backfill after create failed");
                }
                if let Some(reconciler) = &self.reconciler {
                    reconciler.request();
                }
                None
            }
        };

        self.finish(ActionKind::CreateMarket, receipt, market_id, events).await
    }

    pub async fn place_bet(
        &self,
        market_id: u64,
        side: Side,
        amount: U256,
    ) -> Result<ActionReceipt, ActionError> {
        if amount.is_zero() {
            return Err(ActionError::Validation("bet amount must be positive".into()));
        }
        let market = self.known_market(market_id).await?;
        if market.resolved || market.has_ended(now_secs()) {
            return Err(ActionError::Validation(format!("market {market_id} is closed")));
        }
        if self.reader.is_bet_locked(market_id).await? {
            return Err(ActionError::Validation(format!("betting on market {market_id} is locked")));
        }
        let cap = self.settings.max_bet_per_user;
        if !cap.is_zero() {
            let user = self.sender();
            let staked = self
                .mirror
                .bets_for_market(market_id)
                .await?
                .iter()
                .filter(|b| b.user == user)
                .fold(U256::ZERO, |acc, b| acc.saturating_add(b.amount));
            if staked.saturating_add(amount) > cap {
                return Err(ActionError::Validation(format!(
                    "bet would exceed the per-user cap of {cap}"
                )));
            }
        }

        let tx = self.request(abi::place_bet_call(market_id, side), amount);
        let (receipt, events) = self.execute(ActionKind::PlaceBet, &tx).await?;

        let mut provisional = market;
        for event in &events {
            if let MarketEvent::BetPlaced {
                market_id: id,
                user,
                side,
                amount,
            } = event
            {
                if *id != market_id {
                    continue;
                }
                self.mirror
                    .append_bet(Bet {
                        market_id,
                        user: *user,
                        side: *side,
                        amount: *amount,
                        tx_hash: receipt.tx_hash,
                        created_at: Utc::now(),
                    })
                    .await?;
                match side {
                    Side::Yes => provisional.total_yes = provisional.total_yes.saturating_add(*amount),
                    Side::No => provisional.total_no = provisional.total_no.saturating_add(*amount),
                }
            }
        }
        provisional.provisional = true;
        provisional.last_synced_at = Utc::now();
        self.mirror.upsert_market(provisional).await?;
        self.converge(market_id).await;

        self.finish(ActionKind::PlaceBet, receipt, Some(market_id), events).await
    }

    /// Permissionless once the market has ended. Concurrent resolvers race on
    /// chain; the loser's simulation reverts.
    pub async fn resolve(&self, market_id: u64) -> Result<ActionReceipt, ActionError> {
        let market = self.known_market(market_id).await?;
        if market.resolved {
            return Err(ActionError::Validation(format!("market {market_id} is already resolved")));
        }
        if !market.has_ended(now_secs()) {
            return Err(ActionError::Validation(format!("market {market_id} has not ended")));
        }

        let tx = self.request(abi::resolve_market_call(market_id), U256::ZERO);
        let (receipt, events) = self.execute(ActionKind::Resolve, &tx).await?;

        let mut provisional = market;
        for event in &events {
            if let MarketEvent::MarketResolved {
                market_id: id,
                winning_side,
                distributable_pool,
                fee_amount,
            } = event
            {
                if *id == market_id {
                    provisional.resolved = true;
                    provisional.winning_side = *winning_side;
                    provisional.distributable_pool = *distributable_pool;
                    provisional.fee_amount = *fee_amount;
                }
            }
        }
        provisional.provisional = true;
        provisional.last_synced_at = Utc::now();
        self.mirror.upsert_market(provisional).await?;
        self.converge(market_id).await;

        self.finish(ActionKind::Resolve, receipt, Some(market_id), events).await
    }

    pub async fn claim(&self, market_id: u64) -> Result<ActionReceipt, ActionError> {
        let user = self.sender();
        if self.mirror.has_claim(market_id, user).await? {
            return Err(ActionError::Validation(format!(
                "payout for market {market_id} already claimed"
            )));
        }
        let market = self.known_market(market_id).await?;
        if !market.resolved {
            return Err(ActionError::Validation(format!("market {market_id} is not resolved")));
        }
        if self.reader.claimable(market_id, user).await?.is_zero() {
            return Err(ActionError::Validation(format!(
                "nothing to claim on market {market_id}"
            )));
        }

        let tx = self.request(abi::claim_call(market_id), U256::ZERO);
        let (receipt, events) = self.execute(ActionKind::Claim, &tx).await?;

        for event in &events {
            if let MarketEvent::PayoutClaimed {
                market_id: id,
                user: claimant,
                payout,
            } = event
            {
                if *id != market_id {
                    continue;
                }
                self.mirror
                    .append_claim(Claim {
                        market_id,
                        user: *claimant,
                        payout: *payout,
                        tx_hash: receipt.tx_hash,
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }
        self.converge(market_id).await;

        self.finish(ActionKind::Claim, receipt, Some(market_id), events).await
    }

    /// Claim every resolved market with an unclaimed payout, one by one.
    /// Each claim is final on its own: a failure is recorded and the batch
    /// moves on, and a later call only retries what is still unclaimed. A
    /// wallet cancellation stops the batch.
    pub async fn claim_all(&self) -> Result<Vec<ClaimAttempt>, ActionError> {
        let user = self.sender();
        let pending = self.settlement.pending_claims(user).await?;
        info!(user = %user, markets = pending.len(), "claiming all payouts");

        let mut attempts = Vec::with_capacity(pending.len());
        for view in pending {
            match self.claim(view.market_id).await {
                Ok(done) => attempts.push(ClaimAttempt {
                    market_id: view.market_id,
                    tx_hash: Some(done.tx_hash),
                    error: None,
                }),
                Err(ActionError::UserCancelled) => {
                    info!(market_id = view.market_id, "claim-all cancelled by user");
                    break;
                }
                Err(e) => {
                    warn!(market_id = view.market_id, error = %e, "claim failed, continuing");
                    attempts.push(ClaimAttempt {
                        market_id: view.market_id,
                        tx_hash: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(attempts)
    }

    // ─── Pipeline ───────────────────────────────────────────────────────────

    fn request(&self, data: alloy::primitives::Bytes, value: U256) -> TxRequest {
        TxRequest {
            to: self.reader.contract(),
            data,
            value,
        }
    }

    /// Mirror row for `id`, pulling it from chain if the mirror lacks it.
    async fn known_market(&self, id: u64) -> Result<Market, ActionError> {
        if let Some(m) = self.mirror.get_market(id).await? {
            return Ok(m);
        }
        match self.sync.single_market_resync(id).await {
            Ok(m) => Ok(m),
            Err(crate::sync::SyncError::Rpc(RpcError::Reverted(_))) => {
                Err(ActionError::Validation(format!("market {id} does not exist")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Simulate, submit and wait. On success returns the receipt and its
    /// decoded events; on any failure no mirror state has been touched.
    async fn execute(
        &self,
        kind: ActionKind,
        tx: &TxRequest,
    ) -> Result<(TxReceipt, Vec<MarketEvent>), ActionError> {
        self.set_status(ActionStatus::Submitting);
        let result = self.submit_and_confirm(kind, tx).await;
        match &result {
            Ok(_) => {}
            Err(ActionError::UserCancelled) => {
                debug!(action = ?kind, "action cancelled in wallet");
                self.set_status(ActionStatus::Idle);
            }
            Err(e) => {
                warn!(action = ?kind, error = %e, "action failed");
                self.set_status(ActionStatus::Failed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    async fn submit_and_confirm(
        &self,
        kind: ActionKind,
        tx: &TxRequest,
    ) -> Result<(TxReceipt, Vec<MarketEvent>), ActionError> {
        self.wallet.simulate(tx).await?;
        let tx_hash = self.wallet.submit(tx).await?;
        info!(action = ?kind, tx = %tx_hash, "transaction submitted");

        if self.settings.reward_policy == RewardPolicy::HashOnly {
            self.spawn_grant(kind, tx_hash);
        }

        self.set_status(ActionStatus::Confirming);
        let transport = self.reader.primary();
        let receipt = wait_for_receipt(
            transport.as_ref(),
            tx_hash,
            self.settings.receipt_poll_interval,
            self.settings.receipt_timeout,
        )
        .await
        .map_err(|e| match e {
            RpcError::Timeout(d) => ActionError::Timeout(d),
            other => ActionError::Rpc(other),
        })?;

        if !receipt.success {
            // Replaying the call against current state is the best reason we can get.
            let reason = match self.wallet.simulate(tx).await {
                Err(ActionError::SimulationRevert(reason)) => reason,
                _ => "reverted without reason".to_string(),
            };
            return Err(ActionError::OnChainRevert { tx_hash, reason });
        }

        let events = decode_receipt(&receipt, self.reader.contract());
        debug!(action = ?kind, tx = %tx_hash, events = events.len(), "receipt decoded");
        Ok((receipt, events))
    }

    async fn finish(
        &self,
        kind: ActionKind,
        receipt: TxReceipt,
        market_id: Option<u64>,
        events: Vec<MarketEvent>,
    ) -> Result<ActionReceipt, ActionError> {
        let reward_total = match self.settings.reward_policy {
            RewardPolicy::ConfirmFirst => self.grant(kind, receipt.tx_hash).await,
            RewardPolicy::HashOnly => None,
        };
        self.set_status(ActionStatus::Done {
            tx_hash: receipt.tx_hash,
        });
        info!(action = ?kind, market_id = ?market_id, tx = %receipt.tx_hash, "action confirmed");
        Ok(ActionReceipt {
            action: kind,
            tx_hash: receipt.tx_hash,
            market_id,
            reward_total,
            events,
        })
    }

    /// Single-market resync plus a nudge to the reconciler. Failures only
    /// delay convergence, so they are logged, not returned.
    async fn converge(&self, market_id: u64) {
        if let Err(e) = self.sync.single_market_resync(market_id).await {
            debug!(market_id, error = %e, "post-action resync failed, reconciler will retry");
        }
        if let Some(reconciler) = &self.reconciler {
            reconciler.request();
        }
    }

    async fn grant(&self, kind: ActionKind, tx_hash: B256) -> Option<u64> {
        let gateway = self.rewards.as_ref()?;
        let points = gateway.points_for(kind.category());
        if points == 0 {
            return None;
        }
        match gateway
            .grant_if_verified(self.sender(), points, kind.category(), tx_hash, self.settings.chain_id)
            .await
        {
            Ok(outcome) => Some(outcome.new_total),
            Err(e) => {
                warn!(action = ?kind, tx = %tx_hash, error = %e, "reward not granted");
                None
            }
        }
    }

    fn spawn_grant(&self, kind: ActionKind, tx_hash: B256) {
        let Some(gateway) = self.rewards.clone() else {
            return;
        };
        let points = gateway.points_for(kind.category());
        if points == 0 {
            return;
        }
        let wallet = self.sender();
        let chain_id = self.settings.chain_id;
        tokio::spawn(async move {
            if let Err(e) = gateway
                .grant_if_verified(wallet, points, kind.category(), tx_hash, chain_id)
                .await
            {
                warn!(action = ?kind, tx = %tx_hash, error = %e, "reward not granted");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fake::{now_secs as chain_now, FakeChain, FakeMarket, FakeWallet};
    use crate::chain::{ReceiptPolicy, ReceiptVerifier, RetryPolicy, WinningSide};
    use crate::mirror::MemoryMirror;
    use crate::rewards::MemoryRewardLedger;
    use crate::sync::SyncSettings;
    use std::sync::atomic::Ordering;

    const CHAIN_ID: u64 = 84532;

    struct Harness {
        chain: Arc<FakeChain>,
        wallet: Arc<FakeWallet>,
        mirror: Arc<MemoryMirror>,
        sync: Arc<SyncEngine>,
        ledger: Arc<MemoryRewardLedger>,
        orchestrator: ActionOrchestrator,
    }

    fn harness(policy: RewardPolicy) -> Harness {
        let chain = Arc::new(FakeChain::new());
        let user = Address::repeat_byte(0x42);
        let wallet = Arc::new(FakeWallet::new(chain.clone(), user));
        let mirror = Arc::new(MemoryMirror::new());
        let ledger = Arc::new(MemoryRewardLedger::new());

        let reader = Arc::new(ChainReader::new(
            chain.clone(),
            None,
            FakeChain::contract(),
            RetryPolicy::default(),
        ));
        let sync = Arc::new(SyncEngine::new(reader, mirror.clone(), SyncSettings::default()));
        let verifier = ReceiptVerifier::new(ReceiptPolicy {
            initial_delay: Duration::from_millis(200),
            poll_interval: Duration::from_millis(200),
            max_polls: 3,
        })
        .with_chain(CHAIN_ID, chain.clone());
        let gateway = RewardGateway::new(
            Arc::new(verifier),
            ledger.clone(),
            Some(FakeChain::contract()),
            "test",
        );
        let settings = ActionSettings {
            chain_id: CHAIN_ID,
            max_bet_per_user: U256::from(100),
            min_duration_secs: 60,
            receipt_poll_interval: Duration::from_millis(100),
            receipt_timeout: Duration::from_secs(5),
            reward_policy: policy,
            ..ActionSettings::default()
        };
        let orchestrator = ActionOrchestrator::new(
            wallet.clone(),
            sync.clone(),
            None,
            Some(Arc::new(gateway)),
            settings,
        );

        Harness {
            chain,
            wallet,
            mirror,
            sync,
            ledger,
            orchestrator,
        }
    }

    fn user() -> Address {
        Address::repeat_byte(0x42)
    }

    /// An ended market where `user()` holds the winning stake.
    fn resolved_market(h: &Harness, yes: u64, no: u64) -> u64 {
        let id = h.chain.add_market(FakeMarket::open("Done?", chain_now() - 10));
        h.chain.add_stake(id, user(), Side::Yes, yes);
        h.chain.add_stake(id, Address::repeat_byte(0x77), Side::No, no);
        h.chain.resolve(id);
        id
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_market_uses_logged_id() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(2);

        let done = h.orchestrator.create_market("Will it rain?", 3_600).await.unwrap();
        assert_eq!(done.market_id, Some(3));
        assert_eq!(done.reward_total, Some(50));
        assert_eq!(h.orchestrator.status(), ActionStatus::Done { tx_hash: done.tx_hash });

        let row = h.mirror.get_market(3).await.unwrap().unwrap();
        assert_eq!(row.question, "Will it rain?");
        assert_eq!(row.creator, user());
        assert!(!row.provisional);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_without_log_reports_pending_id() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.wallet.drop_logs_next();
        // every contract read fails, so neither the count nor a backfill can help
        h.chain.rate_limit_next(u32::MAX);

        let done = h.orchestrator.create_market("Will it hail?", 3_600).await.unwrap();
        assert_eq!(done.market_id, None);
        assert_eq!(done.reward_total, None);
        assert_eq!(h.orchestrator.status(), ActionStatus::Done { tx_hash: done.tx_hash });
        assert!(h.mirror.get_market(1).await.unwrap().is_none());

        h.chain.rate_limit_next(0);
        h.sync.backfill_from_mirror().await.unwrap();
        let row = h.mirror.get_market(1).await.unwrap().unwrap();
        assert_eq!(row.question, "Will it hail?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_market_validation() {
        let h = harness(RewardPolicy::ConfirmFirst);
        assert!(matches!(
            h.orchestrator.create_market("   ", 3_600).await,
            Err(ActionError::Validation(_))
        ));
        assert!(matches!(
            h.orchestrator.create_market("Too short?", 10).await,
            Err(ActionError::Validation(_))
        ));
        assert_eq!(h.wallet.submitted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_bet_appends_from_logs() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);

        let done = h
            .orchestrator
            .place_bet(1, Side::Yes, U256::from(40))
            .await
            .unwrap();
        assert_eq!(done.reward_total, Some(10));

        let bets = h.mirror.bets_for_market(1).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].amount, U256::from(40));
        assert_eq!(bets[0].tx_hash, done.tx_hash);

        let row = h.mirror.get_market(1).await.unwrap().unwrap();
        assert_eq!(row.total_yes, U256::from(40));
        assert!(!row.provisional);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bet_cap_and_zero_amount() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);

        assert!(matches!(
            h.orchestrator.place_bet(1, Side::No, U256::ZERO).await,
            Err(ActionError::Validation(_))
        ));
        h.orchestrator.place_bet(1, Side::No, U256::from(80)).await.unwrap();
        assert!(matches!(
            h.orchestrator.place_bet(1, Side::Yes, U256::from(30)).await,
            Err(ActionError::Validation(_))
        ));
        assert_eq!(h.wallet.submitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_market_rejected() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        h.chain.update_market(1, |m| m.locked = true);

        let err = h.orchestrator.place_bet(1, Side::Yes, U256::from(1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_cancel_is_silent() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        h.wallet.reject_next();

        let err = h.orchestrator.place_bet(1, Side::Yes, U256::from(5)).await.unwrap_err();
        assert!(matches!(err, ActionError::UserCancelled));
        assert_eq!(h.orchestrator.status(), ActionStatus::Idle);
        assert!(h.mirror.bets_for_market(1).await.unwrap().is_empty());
        assert_eq!(h.ledger.grant_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_revert_sends_nothing() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        // mirror still believes the market is open
        h.orchestrator.place_bet(1, Side::Yes, U256::from(1)).await.unwrap();
        h.chain.update_market(1, |m| m.end_time = chain_now() - 1);

        let err = h.orchestrator.place_bet(1, Side::Yes, U256::from(1)).await.unwrap_err();
        match err {
            ActionError::SimulationRevert(reason) => assert_eq!(reason, "market closed"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.wallet.submitted.load(Ordering::SeqCst), 1);
        assert!(matches!(h.orchestrator.status(), ActionStatus::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_onchain_revert_writes_nothing() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        h.wallet.revert_onchain_next();

        let err = h.orchestrator.place_bet(1, Side::No, U256::from(5)).await.unwrap_err();
        assert!(matches!(err, ActionError::OnChainRevert { .. }));
        assert!(h.mirror.bets_for_market(1).await.unwrap().is_empty());
        assert_eq!(h.ledger.grant_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_then_claim() {
        let h = harness(RewardPolicy::ConfirmFirst);
        let id = h.chain.add_market(FakeMarket::open("Ended?", chain_now() + 3_600));
        h.orchestrator.place_bet(id, Side::Yes, U256::from(3)).await.unwrap();
        h.chain.add_stake(id, Address::repeat_byte(0x77), Side::No, 1);
        h.chain.update_market(id, |m| m.end_time = chain_now() - 1);
        h.sync.single_market_resync(id).await.unwrap();

        let resolved = h.orchestrator.resolve(id).await.unwrap();
        assert_eq!(resolved.reward_total, Some(10 + 25));
        let row = h.mirror.get_market(id).await.unwrap().unwrap();
        assert!(row.resolved);
        assert_eq!(row.winning_side, WinningSide::Yes);

        let claimed = h.orchestrator.claim(id).await.unwrap();
        assert!(claimed
            .events
            .iter()
            .any(|e| matches!(e, MarketEvent::PayoutClaimed { payout, .. } if *payout == U256::from(4))));
        assert!(h.mirror.has_claim(id, user()).await.unwrap());

        assert!(matches!(
            h.orchestrator.claim(id).await,
            Err(ActionError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_end_rejected() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        assert!(matches!(
            h.orchestrator.resolve(1).await,
            Err(ActionError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_all_is_resumable() {
        let h = harness(RewardPolicy::ConfirmFirst);
        let first = resolved_market(&h, 3, 1);
        let second = resolved_market(&h, 2, 2);
        for (id, stake) in [(first, 3u64), (second, 2)] {
            h.sync.single_market_resync(id).await.unwrap();
            h.mirror
                .append_bet(Bet {
                    market_id: id,
                    user: user(),
                    side: Side::Yes,
                    amount: U256::from(stake),
                    tx_hash: B256::repeat_byte(id as u8),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        h.wallet.revert_onchain_next();
        let attempts = h.orchestrator.claim_all().await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].error.is_some());
        assert!(attempts[1].tx_hash.is_some());
        assert!(!h.mirror.has_claim(first, user()).await.unwrap());
        assert!(h.mirror.has_claim(second, user()).await.unwrap());

        let retry = h.orchestrator.claim_all().await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].market_id, first);
        assert!(retry[0].tx_hash.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_only_still_requires_confirmation() {
        let h = harness(RewardPolicy::HashOnly);
        h.chain.seed_markets(1);

        let done = h.orchestrator.place_bet(1, Side::Yes, U256::from(5)).await.unwrap();
        assert_eq!(done.reward_total, None);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.ledger.total(user()), 10);

        // reverted transaction: the early grant request is refused
        h.wallet.revert_onchain_next();
        assert!(h.orchestrator.place_bet(1, Side::Yes, U256::from(5)).await.is_err());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.ledger.total(user()), 10);
        assert_eq!(h.ledger.grant_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_transitions_are_published() {
        let h = harness(RewardPolicy::ConfirmFirst);
        h.chain.seed_markets(1);
        let mut rx = h.orchestrator.subscribe();
        assert_eq!(*rx.borrow_and_update(), ActionStatus::Idle);

        h.orchestrator.place_bet(1, Side::No, U256::from(1)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(matches!(*rx.borrow(), ActionStatus::Done { .. }));
        assert!(h.orchestrator.status().to_string().starts_with("done"));
    }
}
