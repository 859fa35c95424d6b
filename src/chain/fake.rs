//! In-process market contract used by the test suites: answers reads like
//! the real contract, executes submitted transactions and hands out
//! receipts with properly encoded logs.

use crate::actions::wallet::{TxRequest, TxSubmitter};
use crate::actions::ActionError;
use crate::chain::abi::{self, encode, AbiReader, Token};
use crate::chain::events::{encode_event, MarketEvent};
use crate::chain::transport::ChainTransport;
use crate::chain::types::{RpcError, Side, TxReceipt, WinningSide};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct FakeMarket {
    pub question: String,
    pub creator: Address,
    pub end_time: u64,
    pub resolved: bool,
    pub winning_side: WinningSide,
    pub total_yes: U256,
    pub total_no: U256,
    pub fee_amount: U256,
    pub distributable_pool: U256,
    pub locked: bool,
}

impl FakeMarket {
    pub fn open(question: &str, end_time: u64) -> Self {
        Self {
            question: question.to_string(),
            creator: Address::repeat_byte(0xcc),
            end_time,
            resolved: false,
            winning_side: WinningSide::Unset,
            total_yes: U256::ZERO,
            total_no: U256::ZERO,
            fee_amount: U256::ZERO,
            distributable_pool: U256::ZERO,
            locked: false,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[derive(Default)]
struct State {
    markets: BTreeMap<u64, FakeMarket>,
    stakes: HashMap<(u64, Address), (U256, U256)>,
    claimed: HashSet<(u64, Address)>,
    receipts: HashMap<B256, TxReceipt>,
    failing: HashSet<u64>,
}

pub(crate) struct FakeChain {
    state: Mutex<State>,
    rate_limited: AtomicU32,
    calls: AtomicU32,
    down: AtomicBool,
    nonce: AtomicU64,
    /// Fee taken at resolution, in basis points of the total stake.
    fee_bps: u64,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::with_fee_bps(0)
    }

    pub fn with_fee_bps(fee_bps: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            rate_limited: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            down: AtomicBool::new(false),
            nonce: AtomicU64::new(1),
            fee_bps,
        }
    }

    pub fn contract() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Markets 1..=n, open for an hour.
    pub fn seed_markets(&self, n: u64) {
        let end = now_secs() + 3600;
        let mut state = self.state();
        for id in 1..=n {
            state
                .markets
                .insert(id, FakeMarket::open(&format!("Question {id}?"), end));
        }
    }

    pub fn add_market(&self, market: FakeMarket) -> u64 {
        let mut state = self.state();
        let id = state.markets.len() as u64 + 1;
        state.markets.insert(id, market);
        id
    }

    pub fn update_market(&self, id: u64, f: impl FnOnce(&mut FakeMarket)) {
        let mut state = self.state();
        if let Some(m) = state.markets.get_mut(&id) {
            f(m);
        }
    }

    pub fn market(&self, id: u64) -> Option<FakeMarket> {
        self.state().markets.get(&id).cloned()
    }

    pub fn add_stake(&self, id: u64, user: Address, side: Side, amount: u64) {
        let amount = U256::from(amount);
        let mut state = self.state();
        let entry = state.stakes.entry((id, user)).or_insert((U256::ZERO, U256::ZERO));
        match side {
            Side::Yes => entry.0 += amount,
            Side::No => entry.1 += amount,
        }
        if let Some(m) = state.markets.get_mut(&id) {
            match side {
                Side::Yes => m.total_yes += amount,
                Side::No => m.total_no += amount,
            }
        }
    }

    /// Resolve as the contract would: larger side wins, equal is a tie.
    pub fn resolve(&self, id: u64) -> Option<MarketEvent> {
        let mut state = self.state();
        let m = state.markets.get_mut(&id)?;
        if m.resolved {
            return None;
        }
        let total = m.total_yes + m.total_no;
        m.winning_side = if m.total_yes > m.total_no {
            WinningSide::Yes
        } else if m.total_no > m.total_yes {
            WinningSide::No
        } else {
            WinningSide::Tie
        };
        m.fee_amount = total * U256::from(self.fee_bps) / U256::from(10_000u64);
        m.distributable_pool = total - m.fee_amount;
        m.resolved = true;
        Some(MarketEvent::MarketResolved {
            market_id: id,
            winning_side: m.winning_side,
            distributable_pool: m.distributable_pool,
            fee_amount: m.fee_amount,
        })
    }

    pub fn rate_limit_next(&self, n: u32) {
        self.rate_limited.store(n, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_market(&self, id: u64) {
        self.state().failing.insert(id);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_hash(&self) -> B256 {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        abi::keccak256(&n.to_be_bytes())
    }

    pub fn insert_receipt(&self, from: Address, success: bool) -> B256 {
        self.insert_receipt_with(from, success, Vec::new())
    }

    pub fn insert_receipt_with(&self, from: Address, success: bool, events: Vec<MarketEvent>) -> B256 {
        let hash = self.next_hash();
        self.store_receipt(hash, from, success, events);
        hash
    }

    fn store_receipt(&self, hash: B256, from: Address, success: bool, events: Vec<MarketEvent>) {
        let logs = events
            .iter()
            .map(|e| encode_event(Self::contract(), e))
            .collect();
        let receipt = TxReceipt {
            tx_hash: hash,
            success,
            from,
            to: Some(Self::contract()),
            block_number: Some(self.nonce.load(Ordering::SeqCst)),
            logs,
        };
        self.state().receipts.insert(hash, receipt);
    }

    fn payout(state: &State, id: u64, user: Address) -> U256 {
        let Some(m) = state.markets.get(&id) else {
            return U256::ZERO;
        };
        if !m.resolved || state.claimed.contains(&(id, user)) {
            return U256::ZERO;
        }
        let (yes, no) = state.stakes.get(&(id, user)).copied().unwrap_or_default();
        let (pool, stake) = match m.winning_side {
            WinningSide::Yes => (m.total_yes, yes),
            WinningSide::No => (m.total_no, no),
            WinningSide::Tie => (m.total_yes + m.total_no, yes + no),
            WinningSide::Unset => return U256::ZERO,
        };
        if pool.is_zero() || stake.is_zero() {
            return U256::ZERO;
        }
        m.distributable_pool * stake / pool
    }

    fn answer(&self, data: &[u8]) -> Result<Bytes, RpcError> {
        if data.len() < 4 {
            return Err(RpcError::Reverted("execution reverted: no selector".into()));
        }
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
        let args = AbiReader::new(&data[4..]);
        let guard = self.state();
        let state: &State = &guard;

        let market = |id: u64| -> Result<&FakeMarket, RpcError> {
            if state.failing.contains(&id) {
                return Err(RpcError::Transport(format!("upstream error reading market {id}")));
            }
            state
                .markets
                .get(&id)
                .ok_or_else(|| RpcError::Reverted("execution reverted: unknown market".into()))
        };

        let out = match selector {
            abi::MARKET_COUNT => encode(&[Token::uint(state.markets.len() as u64)]),
            abi::GET_MARKET => {
                let m = market(args.u64(0)?)?;
                encode(&[
                    Token::String(m.question.clone()),
                    Token::Address(m.creator),
                    Token::uint(m.end_time),
                    Token::Bool(m.resolved),
                    Token::uint(u64::from(m.winning_side.as_u8())),
                    Token::Uint(m.total_yes),
                    Token::Uint(m.total_no),
                    Token::Uint(m.fee_amount),
                    Token::Uint(m.distributable_pool),
                ])
            }
            abi::GET_USER_STAKES => {
                let key = (args.u64(0)?, args.address(1)?);
                let (yes, no) = state.stakes.get(&key).copied().unwrap_or_default();
                encode(&[Token::Uint(yes), Token::Uint(no)])
            }
            abi::GET_CLAIMABLE => {
                let payout = Self::payout(state, args.u64(0)?, args.address(1)?);
                encode(&[Token::Uint(payout)])
            }
            abi::GET_MARKET_IMBALANCE => {
                let m = market(args.u64(0)?)?;
                let total = m.total_yes + m.total_no;
                let bps = if total.is_zero() {
                    U256::ZERO
                } else {
                    let diff = if m.total_yes > m.total_no {
                        m.total_yes - m.total_no
                    } else {
                        m.total_no - m.total_yes
                    };
                    diff * U256::from(10_000u64) / total
                };
                encode(&[Token::Uint(bps)])
            }
            abi::IS_BET_LOCKED => {
                let m = market(args.u64(0)?)?;
                encode(&[Token::Bool(m.locked)])
            }
            _ => return Err(RpcError::Reverted("execution reverted: unknown selector".into())),
        };
        Ok(Bytes::from(out))
    }

    /// Run a transaction against contract state. Returns the emitted events
    /// or the revert reason.
    pub fn execute(&self, from: Address, tx: &TxRequest) -> Result<Vec<MarketEvent>, String> {
        self.check(from, tx)?;
        let selector: [u8; 4] = [tx.data[0], tx.data[1], tx.data[2], tx.data[3]];
        let args = AbiReader::new(&tx.data[4..]);
        let now = now_secs();

        match selector {
            abi::CREATE_MARKET => {
                let question = args.string(0).map_err(|e| e.to_string())?;
                let duration = args.u64(1).map_err(|e| e.to_string())?;
                let mut market = FakeMarket::open(&question, now + duration);
                market.creator = from;
                let end_time = market.end_time;
                let id = self.add_market(market);
                Ok(vec![MarketEvent::MarketCreated {
                    market_id: id,
                    creator: from,
                    question,
                    end_time,
                }])
            }
            abi::PLACE_BET => {
                let id = args.u64(0).map_err(|e| e.to_string())?;
                let side = Side::from_u8(args.u8(1).map_err(|e| e.to_string())?)
                    .ok_or("bad side")?;
                let amount = u64::try_from(tx.value).map_err(|_| "amount too large")?;
                self.add_stake(id, from, side, amount);
                Ok(vec![MarketEvent::BetPlaced {
                    market_id: id,
                    user: from,
                    side,
                    amount: tx.value,
                }])
            }
            abi::RESOLVE_MARKET => {
                let id = args.u64(0).map_err(|e| e.to_string())?;
                self.resolve(id).map(|e| vec![e]).ok_or_else(|| "already resolved".to_string())
            }
            abi::CLAIM => {
                let id = args.u64(0).map_err(|e| e.to_string())?;
                let mut state = self.state();
                let payout = Self::payout(&state, id, from);
                state.claimed.insert((id, from));
                Ok(vec![MarketEvent::PayoutClaimed {
                    market_id: id,
                    user: from,
                    payout,
                }])
            }
            _ => Err("unknown selector".to_string()),
        }
    }

    /// Contract-side require() checks.
    pub fn check(&self, from: Address, tx: &TxRequest) -> Result<(), String> {
        if tx.data.len() < 4 {
            return Err("no selector".to_string());
        }
        let selector: [u8; 4] = [tx.data[0], tx.data[1], tx.data[2], tx.data[3]];
        let args = AbiReader::new(&tx.data[4..]);
        let state = self.state();
        let now = now_secs();
        let id = args.u64(0).unwrap_or(0);

        match selector {
            abi::CREATE_MARKET => Ok(()),
            abi::PLACE_BET => {
                let m = state.markets.get(&id).ok_or("unknown market")?;
                if m.resolved || now >= m.end_time {
                    return Err("market closed".to_string());
                }
                if m.locked {
                    return Err("bets locked".to_string());
                }
                if tx.value.is_zero() {
                    return Err("zero bet".to_string());
                }
                Ok(())
            }
            abi::RESOLVE_MARKET => {
                let m = state.markets.get(&id).ok_or("unknown market")?;
                if m.resolved {
                    return Err("already resolved".to_string());
                }
                if now < m.end_time {
                    return Err("market not ended".to_string());
                }
                Ok(())
            }
            abi::CLAIM => {
                if Self::payout(&state, id, from).is_zero() {
                    return Err("nothing to claim".to_string());
                }
                Ok(())
            }
            _ => Err("unknown selector".to_string()),
        }
    }
}

#[async_trait]
impl ChainTransport for FakeChain {
    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection refused".to_string()));
        }
        let pending = self.rate_limited.load(Ordering::SeqCst);
        if pending > 0 {
            self.rate_limited.store(pending - 1, Ordering::SeqCst);
            return Err(RpcError::classify("HTTP error 429 with body: Too Many Requests"));
        }
        self.answer(&data)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection refused".to_string()));
        }
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    fn endpoint(&self) -> &str {
        "fake://chain"
    }
}

/// Wallet that signs for one address and submits into a `FakeChain`.
pub(crate) struct FakeWallet {
    chain: Arc<FakeChain>,
    sender: Address,
    reject_next: AtomicBool,
    revert_onchain_next: AtomicBool,
    drop_logs_next: AtomicBool,
    pub submitted: AtomicU32,
}

impl FakeWallet {
    pub fn new(chain: Arc<FakeChain>, sender: Address) -> Self {
        Self {
            chain,
            sender,
            reject_next: AtomicBool::new(false),
            revert_onchain_next: AtomicBool::new(false),
            drop_logs_next: AtomicBool::new(false),
            submitted: AtomicU32::new(0),
        }
    }

    /// Next submission is dismissed at the wallet prompt.
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Next submission passes simulation but is mined as a revert.
    pub fn revert_onchain_next(&self) {
        self.revert_onchain_next.store(true, Ordering::SeqCst);
    }

    /// Next submission executes, but its receipt comes back without logs.
    pub fn drop_logs_next(&self) {
        self.drop_logs_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TxSubmitter for FakeWallet {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn simulate(&self, tx: &TxRequest) -> Result<(), ActionError> {
        if self.revert_onchain_next.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.chain
            .check(self.sender, tx)
            .map_err(ActionError::SimulationRevert)
    }

    async fn submit(&self, tx: &TxRequest) -> Result<B256, ActionError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(ActionError::UserCancelled);
        }
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let hash = self.chain.next_hash();
        if self.revert_onchain_next.swap(false, Ordering::SeqCst) {
            self.chain.store_receipt(hash, self.sender, false, Vec::new());
            return Ok(hash);
        }
        match self.chain.execute(self.sender, tx) {
            Ok(events) => {
                let events = if self.drop_logs_next.swap(false, Ordering::SeqCst) {
                    Vec::new()
                } else {
                    events
                };
                self.chain.store_receipt(hash, self.sender, true, events)
            }
            Err(_) => self.chain.store_receipt(hash, self.sender, false, Vec::new()),
        }
        Ok(hash)
    }
}
