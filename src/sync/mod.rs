//! Sync engine: keeps the mirror's market rows equal to chain state.
//!
//! - `full_resync`: enumerate 1..=marketCount, pull every market with bounded
//!   concurrency, upsert. Debounced; one market's failure never aborts the pass.
//! - `single_market_resync`: one market, fallback RPC allowed. Used after a
//!   local action confirms and by the reconciler.
//! - `backfill_missing`: pull ids present on chain but absent from the mirror,
//!   most recent first, bounded per call.

use crate::chain::{ChainReader, ReadMode, RpcError};
use crate::mirror::{Market, MirrorError, MirrorStore, UpsertOutcome};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Rpc(e) => e.is_transient(),
            SyncError::Mirror(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Calls within this window of the previous run coalesce to a no-op.
    pub debounce: Duration,
    /// Concurrent market reads per batch.
    pub concurrency: usize,
    /// Max markets pulled per backfill call.
    pub backfill_limit: usize,
    /// Upper bound on the market count a full pass will walk. A larger count
    /// from the chain is clamped and logged.
    pub max_markets: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3_500),
            concurrency: 4,
            backfill_limit: 50,
            max_markets: 100_000,
        }
    }
}

/// Outcome of one batch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
    /// Rows whose confirmed state differed from chain and were overwritten.
    pub diverged: usize,
}

impl SyncReport {
    fn absorb(&mut self, outcome: &Result<MarketWrite, SyncError>) {
        self.scanned += 1;
        match outcome {
            Ok(w) => {
                if w.written {
                    self.updated += 1;
                }
                if w.diverged {
                    self.diverged += 1;
                }
            }
            Err(_) => self.failed += 1,
        }
    }
}

struct MarketWrite {
    written: bool,
    diverged: bool,
}

/// Which kind of pass produced a report. Each kind owns its own health bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Full,
    Backfill,
}

#[derive(Default)]
struct DebounceState {
    in_flight: bool,
    last_run: Option<Instant>,
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct InFlight<'a>(&'a Mutex<DebounceState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.in_flight = false;
        }
    }
}

pub struct SyncEngine {
    reader: Arc<ChainReader>,
    mirror: Arc<dyn MirrorStore>,
    settings: SyncSettings,
    debounce: Mutex<DebounceState>,
    full_degraded: AtomicBool,
    backfill_degraded: AtomicBool,
    last_report: Mutex<Option<SyncReport>>,
    last_backfill: Mutex<Option<SyncReport>>,
}

impl SyncEngine {
    pub fn new(reader: Arc<ChainReader>, mirror: Arc<dyn MirrorStore>, settings: SyncSettings) -> Self {
        Self {
            reader,
            mirror,
            settings,
            debounce: Mutex::new(DebounceState::default()),
            full_degraded: AtomicBool::new(false),
            backfill_degraded: AtomicBool::new(false),
            last_report: Mutex::new(None),
            last_backfill: Mutex::new(None),
        }
    }

    pub fn mirror(&self) -> Arc<dyn MirrorStore> {
        self.mirror.clone()
    }

    pub fn reader(&self) -> Arc<ChainReader> {
        self.reader.clone()
    }

    /// True when the last full pass or the last backfill hit reads that
    /// failed after retries.
    pub fn is_degraded(&self) -> bool {
        self.full_degraded.load(Ordering::Relaxed) || self.backfill_degraded.load(Ordering::Relaxed)
    }

    /// Report of the last completed full resync.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }

    pub fn last_backfill(&self) -> Option<SyncReport> {
        self.last_backfill.lock().ok().and_then(|r| r.clone())
    }

    fn flag(&self, kind: PassKind) -> &AtomicBool {
        match kind {
            PassKind::Full => &self.full_degraded,
            PassKind::Backfill => &self.backfill_degraded,
        }
    }

    fn mark_degraded(&self, kind: PassKind) {
        self.flag(kind).store(true, Ordering::Relaxed);
    }

    fn finish_pass(&self, kind: PassKind, report: &SyncReport) {
        let degraded = report.failed > 0;
        let was = self.flag(kind).swap(degraded, Ordering::Relaxed);
        if degraded && !was {
            warn!(pass = ?kind, failed = report.failed, "sync degraded: some market reads failed");
        } else if !degraded && was {
            info!(pass = ?kind, "sync recovered");
        }
        let slot = match kind {
            PassKind::Full => &self.last_report,
            PassKind::Backfill => &self.last_backfill,
        };
        if let Ok(mut last) = slot.lock() {
            *last = Some(report.clone());
        }
    }

    /// Claim the debounce slot. None means this call coalesces into a recent
    /// or running pass.
    fn try_begin(&self, force: bool) -> Option<InFlight<'_>> {
        let mut state = self.debounce.lock().ok()?;
        if state.in_flight {
            return None;
        }
        if !force {
            if let Some(last) = state.last_run {
                if last.elapsed() < self.settings.debounce {
                    return None;
                }
            }
        }
        state.in_flight = true;
        state.last_run = Some(Instant::now());
        Some(InFlight(&self.debounce))
    }

    /// Resync every market on chain. Returns `None` when debounced.
    pub async fn full_resync(&self, force: bool) -> Result<Option<SyncReport>, SyncError> {
        let Some(_guard) = self.try_begin(force) else {
            debug!(force, "full resync coalesced");
            return Ok(None);
        };

        let count = match self.reader.market_count().await {
            Ok(n) => n,
            Err(e) => {
                self.mark_degraded(PassKind::Full);
                warn!(error = %e, "full resync could not read market count");
                return Err(e.into());
            }
        };
        let count = self.clamp_count(count);

        let report = self.pull_batch(1..=count, ReadMode::Primary).await;
        info!(
            markets = count,
            updated = report.updated,
            failed = report.failed,
            diverged = report.diverged,
            "full resync complete"
        );
        self.finish_pass(PassKind::Full, &report);
        Ok(Some(report))
    }

    /// Pull one market's authoritative state, falling back to the secondary
    /// RPC if the primary fails.
    pub async fn single_market_resync(&self, id: u64) -> Result<Market, SyncError> {
        let snapshot = self.reader.market(id, ReadMode::FallbackOnError).await?;
        let market = Market::from_snapshot(snapshot, Utc::now());
        self.write(market.clone()).await?;
        Ok(market)
    }

    /// Pull ids on chain that are not in `known_ids`, newest first, at most
    /// `backfill_limit` per call.
    pub async fn backfill_missing(&self, known_ids: &[u64]) -> Result<SyncReport, SyncError> {
        let count = match self.reader.market_count().await {
            Ok(n) => self.clamp_count(n),
            Err(e) => {
                self.mark_degraded(PassKind::Backfill);
                return Err(e.into());
            }
        };
        let known: HashSet<u64> = known_ids.iter().copied().collect();
        let missing: Vec<u64> = (1..=count)
            .rev()
            .filter(|id| !known.contains(id))
            .take(self.settings.backfill_limit)
            .collect();

        if missing.is_empty() {
            debug!(markets = count, "mirror has no gaps");
            let report = SyncReport::default();
            self.finish_pass(PassKind::Backfill, &report);
            return Ok(report);
        }
        info!(missing = missing.len(), markets = count, "backfilling mirror gaps");

        let report = self.pull_batch(missing, ReadMode::Primary).await;
        self.finish_pass(PassKind::Backfill, &report);
        Ok(report)
    }

    /// `backfill_missing` against the ids currently in the mirror.
    pub async fn backfill_from_mirror(&self) -> Result<SyncReport, SyncError> {
        let known = self.mirror.market_ids().await?;
        self.backfill_missing(&known).await
    }

    fn clamp_count(&self, count: u64) -> u64 {
        if count > self.settings.max_markets {
            warn!(
                reported = count,
                max = self.settings.max_markets,
                "market count above configured bound, clamping"
            );
            self.settings.max_markets
        } else {
            count
        }
    }

    async fn pull_batch<I>(&self, ids: I, mode: ReadMode) -> SyncReport
    where
        I: IntoIterator<Item = u64>,
    {
        stream::iter(ids)
            .map(|id| async move { (id, self.pull_one(id, mode).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .fold(SyncReport::default(), |mut report, (id, outcome)| async move {
                if let Err(e) = &outcome {
                    warn!(market_id = id, error = %e, "market resync failed, will retry next pass");
                }
                report.absorb(&outcome);
                report
            })
            .await
    }

    async fn pull_one(&self, id: u64, mode: ReadMode) -> Result<MarketWrite, SyncError> {
        let snapshot = self.reader.market(id, mode).await?;
        self.write(Market::from_snapshot(snapshot, Utc::now())).await
    }

    async fn write(&self, market: Market) -> Result<MarketWrite, SyncError> {
        let previous = self.mirror.get_market(market.id).await?;
        let diverged = match &previous {
            Some(prev) if !prev.provisional => {
                let fields = prev.diff(&market);
                if !fields.is_empty() {
                    info!(market_id = market.id, fields = ?fields, "mirror diverged from chain, overwriting");
                }
                !fields.is_empty()
            }
            _ => false,
        };
        if !market.pool_is_consistent() {
            warn!(
                market_id = market.id,
                pool = %market.distributable_pool,
                fee = %market.fee_amount,
                "chain reports inconsistent pool totals"
            );
        }
        let outcome = self.mirror.upsert_market(market).await?;
        Ok(MarketWrite {
            written: outcome != UpsertOutcome::Stale,
            diverged,
        })
    }

    /// Periodic full resync alongside the debounced on-demand calls.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = self.full_resync(false).await {
                    debug!(error = %e, "periodic resync failed");
                }
            }
        })
    }
}
