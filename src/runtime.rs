//! Start-up wiring shared by the daemon and the CLI: config discovery,
//! logging, and the read path (transports → reader → mirror → sync engine).

use crate::chain::{AlloyTransport, ChainReader, ChainTransport};
use crate::config::{Config, LoggingConfig, MirrorBackend};
use crate::mirror::{MemoryMirror, MirrorStore, ValkeyMirror};
use crate::sync::SyncEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "ledgersync.toml";

/// Load `.env`, then the config file named by `LEDGERSYNC_CONFIG` (default
/// `ledgersync.toml`), falling back to env-only config when it is absent.
pub fn load_config() -> anyhow::Result<Config> {
    let _ = dotenvy::dotenv();
    let path = std::env::var("LEDGERSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    if path.exists() {
        Ok(Config::load(&path)?)
    } else {
        Ok(Config::from_env())
    }
}

pub fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }
}

pub async fn open_mirror(config: &Config) -> anyhow::Result<Arc<dyn MirrorStore>> {
    match config.mirror.backend {
        MirrorBackend::Memory => {
            warn!("using in-memory mirror - state is lost on restart");
            Ok(Arc::new(MemoryMirror::new()))
        }
        MirrorBackend::Valkey => {
            let mirror = ValkeyMirror::connect(&config.mirror.url, &config.mirror.prefix).await?;
            mirror.ping().await?;
            info!(prefix = %config.mirror.prefix, "valkey mirror connected");
            Ok(Arc::new(mirror))
        }
    }
}

/// Primary transport for the configured RPC.
pub async fn connect_transport(config: &Config) -> anyhow::Result<Arc<dyn ChainTransport>> {
    let transport = AlloyTransport::connect(&config.chain.rpc_url, config.request_timeout()).await?;
    Ok(Arc::new(transport))
}

/// Reader over `primary`, plus the fallback endpoint when one is configured.
/// A fallback that fails to connect is logged and skipped.
pub async fn build_reader(
    config: &Config,
    primary: Arc<dyn ChainTransport>,
) -> anyhow::Result<Arc<ChainReader>> {
    let fallback: Option<Arc<dyn ChainTransport>> = match config.fallback_rpc_url() {
        Some(url) => match AlloyTransport::connect(url, config.request_timeout()).await {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                warn!(error = %e, "fallback rpc unavailable, continuing without it");
                None
            }
        },
        None => None,
    };
    Ok(Arc::new(ChainReader::new(
        primary,
        fallback,
        config.contract()?,
        config.retry_policy(),
    )))
}

pub async fn build_sync(
    config: &Config,
    primary: Arc<dyn ChainTransport>,
) -> anyhow::Result<Arc<SyncEngine>> {
    let reader = build_reader(config, primary).await?;
    let mirror = open_mirror(config).await?;
    Ok(Arc::new(SyncEngine::new(reader, mirror, config.sync_settings())))
}
