//! Reward ledger gateway: points are credited only for transactions whose
//! receipt we fetched ourselves, that succeeded, that were sent by the
//! wallet being credited and that emitted the event the category stands for.
//! The amount is capped by the configured rate for the category.
//!
//! The ledger's award call is idempotent per (wallet, tx hash); the gateway
//! passes the hash through untouched so retries never double-grant.

use crate::chain::events::{decode_receipt, MarketEvent};
use crate::chain::{ReceiptVerifier, TxReceipt, VerificationError};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("reward refused: {0}")]
    Verification(#[from] VerificationError),
    #[error("reward ledger request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reward ledger error {status}: {body}")]
    Ledger { status: u16, body: String },
    #[error("reward amount must be positive")]
    ZeroAmount,
    #[error("{amount} points exceeds the {category} rate of {max}")]
    AboveRate {
        category: RewardCategory,
        amount: u64,
        max: u64,
    },
    #[error("transaction {tx_hash} emitted no {category} event for this wallet")]
    CategoryMismatch {
        category: RewardCategory,
        tx_hash: B256,
    },
    #[error("reward total for {wallet} would overflow")]
    Overflow { wallet: Address },
}

/// Which action earned the points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    CreateMarket,
    PlaceBet,
    ResolveMarket,
    Claim,
}

impl RewardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardCategory::CreateMarket => "create_market",
            RewardCategory::PlaceBet => "place_bet",
            RewardCategory::ResolveMarket => "resolve_market",
            RewardCategory::Claim => "claim",
        }
    }
}

impl std::fmt::Display for RewardCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When an orchestrator asks for the grant. Both go through the same
/// verification before anything is credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardPolicy {
    /// Request after our own receipt wait confirms the transaction.
    #[default]
    ConfirmFirst,
    /// Request as soon as a hash exists; the gateway still blocks on the receipt.
    HashOnly,
}

/// Points per category. Zero disables the grant for that category.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RewardPoints {
    #[serde(default = "default_create_points")]
    pub create_market: u64,
    #[serde(default = "default_bet_points")]
    pub place_bet: u64,
    #[serde(default = "default_resolve_points")]
    pub resolve_market: u64,
    #[serde(default = "default_claim_points")]
    pub claim: u64,
}

fn default_create_points() -> u64 {
    50
}
fn default_bet_points() -> u64 {
    10
}
fn default_resolve_points() -> u64 {
    25
}
fn default_claim_points() -> u64 {
    5
}

impl Default for RewardPoints {
    fn default() -> Self {
        Self {
            create_market: default_create_points(),
            place_bet: default_bet_points(),
            resolve_market: default_resolve_points(),
            claim: default_claim_points(),
        }
    }
}

impl RewardPoints {
    pub fn for_category(&self, category: RewardCategory) -> u64 {
        match category {
            RewardCategory::CreateMarket => self.create_market,
            RewardCategory::PlaceBet => self.place_bet,
            RewardCategory::ResolveMarket => self.resolve_market,
            RewardCategory::Claim => self.claim,
        }
    }
}

/// Whether `event` is the one a `category` action by `wallet` emits.
/// Anyone may resolve, so any `MarketResolved` event counts.
fn event_matches(event: &MarketEvent, category: RewardCategory, wallet: Address) -> bool {
    match (category, event) {
        (RewardCategory::CreateMarket, MarketEvent::MarketCreated { creator, .. }) => *creator == wallet,
        (RewardCategory::PlaceBet, MarketEvent::BetPlaced { user, .. }) => *user == wallet,
        (RewardCategory::ResolveMarket, MarketEvent::MarketResolved { .. }) => true,
        (RewardCategory::Claim, MarketEvent::PayoutClaimed { user, .. }) => *user == wallet,
        _ => false,
    }
}

/// One credit request. `tx_hash` is the ledger's dedupe key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardGrant {
    pub wallet: Address,
    pub amount: u64,
    pub category: RewardCategory,
    pub source: String,
    pub tx_hash: B256,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantOutcome {
    pub new_total: u64,
}

/// The reward-point store. `award` must be idempotent per (wallet, tx hash):
/// a repeat returns the unchanged total.
#[async_trait]
pub trait RewardLedger: Send + Sync {
    async fn award(&self, grant: &RewardGrant) -> Result<GrantOutcome, RewardError>;
}

// ─── HTTP ledger ────────────────────────────────────────────────────────────

/// Ledger behind an HTTP RPC endpoint: `POST {base_url}/rpc/award_points`.
pub struct HttpRewardLedger {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AwardResponse {
    Object { new_total: u64 },
    Bare(u64),
}

impl HttpRewardLedger {
    pub fn new(base_url: &str, api_key: &str, timeout: std::time::Duration) -> Result<Self, RewardError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl RewardLedger for HttpRewardLedger {
    async fn award(&self, grant: &RewardGrant) -> Result<GrantOutcome, RewardError> {
        let url = format!("{}/rpc/award_points", self.base_url);
        let body = serde_json::json!({
            "p_wallet": grant.wallet.to_string().to_lowercase(),
            "p_amount": grant.amount,
            "p_category": grant.category.as_str(),
            "p_tx_hash": grant.tx_hash.to_string(),
            "p_source": grant.source,
            "p_chain_id": grant.chain_id,
        });

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RewardError::Ledger { status, body });
        }
        let new_total = match resp.json::<AwardResponse>().await? {
            AwardResponse::Object { new_total } => new_total,
            AwardResponse::Bare(n) => n,
        };
        Ok(GrantOutcome { new_total })
    }
}

// ─── In-memory ledger ───────────────────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    grants: HashMap<(Address, B256), RewardGrant>,
    totals: HashMap<Address, u64>,
}

/// Process-local ledger for dev mode and tests.
#[derive(Default)]
pub struct MemoryRewardLedger {
    state: Mutex<LedgerState>,
}

impl MemoryRewardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self, wallet: Address) -> u64 {
        self.state
            .lock()
            .map(|s| s.totals.get(&wallet).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn grant_count(&self) -> usize {
        self.state.lock().map(|s| s.grants.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RewardLedger for MemoryRewardLedger {
    async fn award(&self, grant: &RewardGrant) -> Result<GrantOutcome, RewardError> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = (grant.wallet, grant.tx_hash);
        let current = state.totals.get(&grant.wallet).copied().unwrap_or(0);
        if state.grants.contains_key(&key) {
            return Ok(GrantOutcome { new_total: current });
        }
        let new_total = current
            .checked_add(grant.amount)
            .ok_or(RewardError::Overflow { wallet: grant.wallet })?;
        state.totals.insert(grant.wallet, new_total);
        state.grants.insert(key, grant.clone());
        Ok(GrantOutcome { new_total })
    }
}

// ─── Gateway ────────────────────────────────────────────────────────────────

pub struct RewardGateway {
    verifier: Arc<ReceiptVerifier>,
    ledger: Arc<dyn RewardLedger>,
    /// When set, the receipt must target this contract.
    contract: Option<Address>,
    source: String,
    points: RewardPoints,
}

impl RewardGateway {
    pub fn new(
        verifier: Arc<ReceiptVerifier>,
        ledger: Arc<dyn RewardLedger>,
        contract: Option<Address>,
        source: &str,
    ) -> Self {
        Self {
            verifier,
            ledger,
            contract,
            source: source.to_string(),
            points: RewardPoints::default(),
        }
    }

    pub fn with_points(mut self, points: RewardPoints) -> Self {
        self.points = points;
        self
    }

    /// Configured rate for `category`; zero means the category earns nothing.
    pub fn points_for(&self, category: RewardCategory) -> u64 {
        self.points.for_category(category)
    }

    fn check_events(
        &self,
        receipt: &TxReceipt,
        wallet: Address,
        category: RewardCategory,
    ) -> Result<(), RewardError> {
        let contract = match self.contract.or(receipt.to) {
            Some(c) => c,
            None => return Err(RewardError::CategoryMismatch { category, tx_hash: receipt.tx_hash }),
        };
        if decode_receipt(receipt, contract)
            .iter()
            .any(|e| event_matches(e, category, wallet))
        {
            Ok(())
        } else {
            Err(RewardError::CategoryMismatch { category, tx_hash: receipt.tx_hash })
        }
    }

    /// Credit `amount` points to `wallet` for `tx_hash`, but only once the
    /// receipt is fetched, successful, sent by `wallet` and carries the event
    /// for `category`. `amount` may not exceed the category's rate. Fails closed.
    pub async fn grant_if_verified(
        &self,
        wallet: Address,
        amount: u64,
        category: RewardCategory,
        tx_hash: B256,
        chain_id: u64,
    ) -> Result<GrantOutcome, RewardError> {
        if amount == 0 {
            return Err(RewardError::ZeroAmount);
        }
        let max = self.points_for(category);
        if amount > max {
            return Err(RewardError::AboveRate { category, amount, max });
        }

        let verified = match self
            .verifier
            .verify_sender(tx_hash, chain_id, wallet, self.contract)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    wallet = %wallet,
                    tx = %tx_hash,
                    category = %category,
                    error = %e,
                    "reward refused"
                );
                return Err(e.into());
            }
        };
        if let Err(e) = self.check_events(&verified.receipt, wallet, category) {
            warn!(wallet = %wallet, tx = %tx_hash, error = %e, "reward refused");
            return Err(e);
        }

        let grant = RewardGrant {
            wallet,
            amount,
            category,
            source: self.source.clone(),
            tx_hash,
            chain_id,
        };
        let outcome = self.ledger.award(&grant).await?;
        info!(
            wallet = %wallet,
            tx = %tx_hash,
            category = %category,
            amount,
            new_total = outcome.new_total,
            "reward granted"
        );
        debug!(source = %self.source, chain_id, "reward grant recorded");
        Ok(outcome)
    }
}
