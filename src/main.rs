use ledgersync::actions::{ActionOrchestrator, AlloyWallet};
use ledgersync::api::{self, ApiState};
use ledgersync::chain::{abi, ReceiptVerifier};
use ledgersync::reconcile::Reconciler;
use ledgersync::rewards::{HttpRewardLedger, MemoryRewardLedger, RewardGateway, RewardLedger};
use ledgersync::runtime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = runtime::load_config()?;
    runtime::init_logging(&config.logging);

    info!("ledgersync v{} starting", env!("CARGO_PKG_VERSION"));

    for (sig, ok) in abi::verify_signatures() {
        if !ok {
            error!(signature = %sig, "ABI selector/topic mismatch - decoding will miss");
        }
    }

    // --- Read path ---
    let primary = runtime::connect_transport(&config).await?;
    let sync = runtime::build_sync(&config, primary.clone()).await?;
    let contract = sync.reader().contract();
    info!(contract = %contract, chain_id = config.chain.chain_id, "market contract");

    // --- Reconciler ---
    let reconciler = if config.reconcile.enabled {
        let r = Arc::new(Reconciler::new(
            sync.clone(),
            Duration::from_secs(config.reconcile.min_interval_secs),
        ));
        r.clone()
            .spawn(Duration::from_secs(config.reconcile.tick_interval_secs.max(1)));
        info!(
            tick_secs = config.reconcile.tick_interval_secs,
            "reconciliation loop started"
        );
        Some(r)
    } else {
        None
    };

    // --- Rewards ---
    let rewards = if config.rewards.enabled {
        let ledger: Arc<dyn RewardLedger> = if config.rewards.ledger_url.is_empty() {
            warn!("no reward ledger url configured - grants are kept in memory");
            Arc::new(MemoryRewardLedger::new())
        } else {
            Arc::new(HttpRewardLedger::new(
                &config.rewards.ledger_url,
                &config.rewards.api_key,
                Duration::from_millis(config.rewards.timeout_ms),
            )?)
        };
        let verifier = ReceiptVerifier::new(config.receipt_policy())
            .with_chain(config.chain.chain_id, primary.clone());
        Some(Arc::new(RewardGateway::new(
            Arc::new(verifier),
            ledger,
            Some(contract),
            &config.rewards.source,
        )
        .with_points(config.rewards.points)))
    } else {
        None
    };

    // --- Actions ---
    let actions = if config.can_sign() {
        let wallet = AlloyWallet::connect(
            &config.chain.rpc_url,
            &config.actions.private_key,
            config.request_timeout(),
        )
        .await?;
        let orchestrator = ActionOrchestrator::new(
            Arc::new(wallet),
            sync.clone(),
            reconciler.clone(),
            rewards.clone(),
            config.action_settings()?,
        );
        info!(sender = %orchestrator.sender(), "actions enabled");
        Some(Arc::new(orchestrator))
    } else {
        warn!("no signing key configured - running read-only (set LEDGERSYNC_PRIVATE_KEY for actions)");
        None
    };

    // --- Startup sync ---
    match sync.full_resync(true).await {
        Ok(Some(report)) => info!(
            scanned = report.scanned,
            updated = report.updated,
            failed = report.failed,
            "startup resync complete"
        ),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "startup resync failed, periodic pass will retry"),
    }
    if config.sync.backfill_on_start {
        if let Err(e) = sync.backfill_from_mirror().await {
            warn!(error = %e, "startup backfill failed");
        }
    }
    if config.sync.full_resync_interval_secs > 0 {
        sync.clone()
            .spawn_periodic(Duration::from_secs(config.sync.full_resync_interval_secs));
    }

    // --- API ---
    if config.api.enabled {
        let mut state = ApiState::new(sync.clone());
        if let Some(a) = actions {
            state = state.with_actions(a);
        }
        if let Some(r) = rewards {
            state = state.with_rewards(r);
        }
        if let Some(r) = reconciler {
            state = state.with_reconciler(r);
        }
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, &bind).await {
                error!(error = %e, "api server exited");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");
    Ok(())
}
