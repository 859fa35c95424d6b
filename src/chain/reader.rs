//! Retrying reader for market contract state.
//!
//! Rate-limit responses are retried with a quadratic backoff
//! (`base × attempt²`) up to a bounded number of attempts; any other error
//! fails fast. Correctness-critical single reads can opt into the fallback
//! endpoint when the primary is degraded.

use crate::chain::abi::{self, AbiReader, Token};
use crate::chain::transport::ChainTransport;
use crate::chain::types::{MarketSnapshot, RpcError, WinningSide};
use alloy::primitives::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A contract read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCall {
    MarketCount,
    GetMarket(u64),
    UserStakes(u64, Address),
    Claimable(u64, Address),
    Imbalance(u64),
    IsBetLocked(u64),
}

impl ReadCall {
    pub fn calldata(&self) -> Bytes {
        match *self {
            ReadCall::MarketCount => abi::encode_call(abi::MARKET_COUNT, &[]),
            ReadCall::GetMarket(id) => abi::encode_call(abi::GET_MARKET, &[Token::uint(id)]),
            ReadCall::UserStakes(id, user) => abi::encode_call(
                abi::GET_USER_STAKES,
                &[Token::uint(id), Token::Address(user)],
            ),
            ReadCall::Claimable(id, user) => abi::encode_call(
                abi::GET_CLAIMABLE,
                &[Token::uint(id), Token::Address(user)],
            ),
            ReadCall::Imbalance(id) => {
                abi::encode_call(abi::GET_MARKET_IMBALANCE, &[Token::uint(id)])
            }
            ReadCall::IsBetLocked(id) => abi::encode_call(abi::IS_BET_LOCKED, &[Token::uint(id)]),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadCall::MarketCount => "marketCount",
            ReadCall::GetMarket(_) => "getMarket",
            ReadCall::UserStakes(..) => "getUserStakes",
            ReadCall::Claimable(..) => "getClaimable",
            ReadCall::Imbalance(_) => "getMarketImbalance",
            ReadCall::IsBetLocked(_) => "isBetLocked",
        }
    }
}

/// Which endpoints a read may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Primary only. Used for batch passes that will simply retry next time.
    Primary,
    /// Primary, then the fallback endpoint if the primary gives up.
    FallbackOnError,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(400),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.saturating_mul(attempt)
    }

    /// Upper bound on time spent sleeping across one exhausted read.
    pub fn worst_case_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

pub struct ChainReader {
    primary: Arc<dyn ChainTransport>,
    fallback: Option<Arc<dyn ChainTransport>>,
    contract: Address,
    retry: RetryPolicy,
}

impl ChainReader {
    pub fn new(
        primary: Arc<dyn ChainTransport>,
        fallback: Option<Arc<dyn ChainTransport>>,
        contract: Address,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            contract,
            retry,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn primary(&self) -> Arc<dyn ChainTransport> {
        self.primary.clone()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Raw read with retry on the primary endpoint.
    pub async fn read_state(&self, call: ReadCall) -> Result<Bytes, RpcError> {
        self.read_with_retry(self.primary.as_ref(), call).await
    }

    /// Raw read, falling back to the secondary endpoint if the primary fails.
    pub async fn read_state_with_fallback(&self, call: ReadCall) -> Result<Bytes, RpcError> {
        match self.read_with_retry(self.primary.as_ref(), call).await {
            Ok(data) => Ok(data),
            Err(RpcError::Reverted(reason)) => Err(RpcError::Reverted(reason)),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        call = call.name(),
                        error = %e,
                        fallback = fallback.endpoint(),
                        "primary rpc failed, retrying read on fallback"
                    );
                    self.read_with_retry(fallback.as_ref(), call).await
                }
                None => Err(e),
            },
        }
    }

    async fn read(&self, call: ReadCall, mode: ReadMode) -> Result<Bytes, RpcError> {
        match mode {
            ReadMode::Primary => self.read_state(call).await,
            ReadMode::FallbackOnError => self.read_state_with_fallback(call).await,
        }
    }

    async fn read_with_retry(
        &self,
        transport: &dyn ChainTransport,
        call: ReadCall,
    ) -> Result<Bytes, RpcError> {
        let data = call.calldata();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match transport.call(self.contract, data.clone()).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        debug!(call = call.name(), attempt, "read succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(e) if e.is_rate_limited() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            call = call.name(),
                            endpoint = transport.endpoint(),
                            attempts = attempt,
                            "rate limited, giving up"
                        );
                        return Err(RpcError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        call = call.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ─── Typed reads ────────────────────────────────────────────────────────

    pub async fn market_count(&self) -> Result<u64, RpcError> {
        let data = self.read_state(ReadCall::MarketCount).await?;
        AbiReader::new(&data).u64(0)
    }

    /// Pull one market's state, imbalance and lock status.
    pub async fn market(&self, id: u64, mode: ReadMode) -> Result<MarketSnapshot, RpcError> {
        let raw = self.read(ReadCall::GetMarket(id), mode).await?;
        let tuple = abi::decode_market(&raw)?;

        let imbalance = self.read(ReadCall::Imbalance(id), mode).await?;
        let imbalance_bps = AbiReader::new(&imbalance).uint(0)?;
        let imbalance_bps = u32::try_from(imbalance_bps.min(U256::from(10_000u64))).unwrap_or(10_000);

        let locked = self.read(ReadCall::IsBetLocked(id), mode).await?;
        let bet_locked = AbiReader::new(&locked).boolean(0)?;

        let winning_side = WinningSide::from_u8(tuple.winning_side).ok_or_else(|| {
            RpcError::Decode(format!("market {id} has unknown outcome {}", tuple.winning_side))
        })?;

        Ok(MarketSnapshot {
            id,
            question: tuple.question,
            creator: tuple.creator,
            end_time: tuple.end_time,
            resolved: tuple.resolved,
            winning_side,
            total_yes: tuple.total_yes,
            total_no: tuple.total_no,
            fee_amount: tuple.fee_amount,
            distributable_pool: tuple.distributable_pool,
            imbalance_bps,
            bet_locked,
        })
    }

    /// (yes stake, no stake) for one user.
    pub async fn user_stakes(&self, id: u64, user: Address) -> Result<(U256, U256), RpcError> {
        let data = self.read_state(ReadCall::UserStakes(id, user)).await?;
        let r = AbiReader::new(&data);
        Ok((r.uint(0)?, r.uint(1)?))
    }

    pub async fn claimable(&self, id: u64, user: Address) -> Result<U256, RpcError> {
        let data = self.read_state(ReadCall::Claimable(id, user)).await?;
        AbiReader::new(&data).uint(0)
    }

    pub async fn is_bet_locked(&self, id: u64) -> Result<bool, RpcError> {
        let data = self.read_state(ReadCall::IsBetLocked(id)).await?;
        AbiReader::new(&data).boolean(0)
    }
}
