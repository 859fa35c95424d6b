//! Reconciliation loop: pulls expired-but-unresolved markets back into sync.
//!
//! A market needs attention when its end time has passed, it is still
//! unresolved in the mirror and it holds stake (zero-stake expired markets are
//! void and never get resolved). Each pass resyncs those markets one by one;
//! failures are logged and retried on the next tick. Passes are throttled and
//! single-flight within one process. Running several daemons against one
//! mirror needs a designated reconciler.

use crate::mirror::MirrorStore;
use crate::sync::SyncEngine;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub candidates: usize,
    /// Candidates the chain now reports as resolved.
    pub resolved: usize,
    pub failed: usize,
}

#[derive(Default)]
struct PassState {
    running: bool,
    last_pass: Option<Instant>,
}

struct Running<'a>(&'a Mutex<PassState>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.running = false;
        }
    }
}

pub struct Reconciler {
    sync: Arc<SyncEngine>,
    mirror: Arc<dyn MirrorStore>,
    min_interval: Duration,
    state: Mutex<PassState>,
    wake: Notify,
}

impl Reconciler {
    pub fn new(sync: Arc<SyncEngine>, min_interval: Duration) -> Self {
        Self {
            mirror: sync.mirror(),
            sync,
            min_interval,
            state: Mutex::new(PassState::default()),
            wake: Notify::new(),
        }
    }

    /// Ask the background loop for an early pass. Still throttled.
    pub fn request(&self) {
        self.wake.notify_one();
    }

    fn try_begin(&self) -> Option<Running<'_>> {
        let mut state = self.state.lock().ok()?;
        if state.running {
            return None;
        }
        if let Some(last) = state.last_pass {
            if last.elapsed() < self.min_interval {
                return None;
            }
        }
        state.running = true;
        state.last_pass = Some(Instant::now());
        Some(Running(&self.state))
    }

    /// One pass at the current wall-clock time.
    pub async fn tick(&self) -> Option<ReconcileReport> {
        let now = Utc::now().timestamp().max(0) as u64;
        self.tick_at(now).await
    }

    /// One pass, treating `now_secs` as the current time. `None` when
    /// throttled or another pass is running.
    pub async fn tick_at(&self, now_secs: u64) -> Option<ReconcileReport> {
        let Some(_running) = self.try_begin() else {
            debug!("reconcile pass skipped");
            return None;
        };

        let markets = match self.mirror.all_markets().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "reconcile could not read mirror");
                return Some(ReconcileReport::default());
            }
        };

        let stale: Vec<u64> = markets
            .iter()
            .filter(|m| m.needs_resolution(now_secs))
            .map(|m| m.id)
            .collect();

        let mut report = ReconcileReport {
            candidates: stale.len(),
            ..ReconcileReport::default()
        };
        for id in stale {
            match self.sync.single_market_resync(id).await {
                Ok(market) if market.resolved => {
                    info!(market_id = id, outcome = %market.winning_side, "market resolved on chain, mirror updated");
                    report.resolved += 1;
                }
                Ok(_) => debug!(market_id = id, "market still awaiting resolution"),
                Err(e) => {
                    debug!(market_id = id, error = %e, "reconcile resync failed, retrying next tick");
                    report.failed += 1;
                }
            }
        }
        if report.candidates > 0 {
            debug!(
                candidates = report.candidates,
                resolved = report.resolved,
                failed = report.failed,
                "reconcile pass complete"
            );
        }
        Some(report)
    }

    /// Run passes every `every`, or sooner when `request` is called.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.wake.notified() => {}
                }
                self.tick().await;
            }
        })
    }
}
