use crate::actions::ActionSettings;
use crate::chain::{ReceiptPolicy, RetryPolicy};
use crate::rewards::{RewardPoints, RewardPolicy};
use crate::sync::SyncSettings;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid value for {field}: {value}")]
    Invalid { field: String, value: String },
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Primary JSON-RPC endpoint - overridden by env LEDGERSYNC_RPC_URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Secondary endpoint for correctness-critical single reads. Empty = none.
    #[serde(default)]
    pub fallback_rpc_url: String,
    /// Market contract address (hex).
    #[serde(default)]
    pub contract_address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Backoff base; the nth retry waits base × n².
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Concurrent market reads per resync batch.
    #[serde(default = "default_resync_concurrency")]
    pub resync_concurrency: usize,
    /// Max markets pulled per backfill call.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Periodic full resync. 0 disables.
    #[serde(default = "default_full_resync_secs")]
    pub full_resync_interval_secs: u64,
    /// Backfill mirror gaps once at start-up.
    #[serde(default = "default_true")]
    pub backfill_on_start: bool,
    /// Bound on the market count a full resync walks.
    #[serde(default = "default_max_markets")]
    pub max_markets: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_tick_secs")]
    pub tick_interval_secs: u64,
    /// Passes closer together than this are skipped.
    #[serde(default = "default_reconcile_min_secs")]
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptConfig {
    #[serde(default = "default_receipt_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_receipt_max_polls")]
    pub max_polls: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Reward ledger RPC base URL. Empty = in-memory ledger.
    #[serde(default)]
    pub ledger_url: String,
    /// Ledger API key - loaded from env LEDGERSYNC_REWARD_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub policy: RewardPolicy,
    /// Source-channel tag stored with each grant.
    #[serde(default = "default_reward_source")]
    pub source: String,
    #[serde(default = "default_reward_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub points: RewardPoints,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionsConfig {
    /// Signing key - loaded from env LEDGERSYNC_PRIVATE_KEY, never stored in the file.
    #[serde(default)]
    pub private_key: String,
    /// Per-user stake cap per market in wei, decimal or 0x-hex. "0" = no cap.
    #[serde(default = "default_max_bet")]
    pub max_bet_per_user_wei: String,
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u64,
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    #[serde(default = "default_max_question_len")]
    pub max_question_len: usize,
    #[serde(default = "default_action_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_action_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MirrorBackend {
    #[default]
    Memory,
    Valkey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub backend: MirrorBackend,
    #[serde(default = "default_valkey_url")]
    pub url: String,
    /// Key namespace, so several deployments can share one Valkey.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_rpc_url() -> String {
    "https://sepolia.base.org".to_string()
}
fn default_chain_id() -> u64 {
    84532
}
fn default_retry_base_ms() -> u64 {
    400
}
fn default_retry_attempts() -> u32 {
    4
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_resync_concurrency() -> usize {
    4
}
fn default_max_markets() -> u64 {
    100_000
}
fn default_backfill_limit() -> usize {
    50
}
fn default_debounce_ms() -> u64 {
    3_500
}
fn default_full_resync_secs() -> u64 {
    60
}
fn default_reconcile_tick_secs() -> u64 {
    15
}
fn default_reconcile_min_secs() -> u64 {
    15
}
fn default_receipt_initial_ms() -> u64 {
    2_000
}
fn default_receipt_poll_ms() -> u64 {
    2_000
}
fn default_receipt_max_polls() -> u32 {
    10
}
fn default_reward_source() -> String {
    "ledgersync".to_string()
}
fn default_reward_timeout_ms() -> u64 {
    10_000
}
fn default_max_bet() -> String {
    "0".to_string()
}
fn default_min_duration() -> u64 {
    300
}
fn default_max_duration() -> u64 {
    90 * 24 * 3600
}
fn default_max_question_len() -> usize {
    280
}
fn default_action_receipt_poll_ms() -> u64 {
    2_000
}
fn default_action_receipt_timeout_secs() -> u64 {
    120
}
fn default_valkey_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_prefix() -> String {
    "ledgersync".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            fallback_rpc_url: String::new(),
            contract_address: String::new(),
            chain_id: default_chain_id(),
            retry_base_ms: default_retry_base_ms(),
            retry_attempts: default_retry_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            resync_concurrency: default_resync_concurrency(),
            backfill_limit: default_backfill_limit(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            full_resync_interval_secs: default_full_resync_secs(),
            backfill_on_start: true,
            max_markets: default_max_markets(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: default_reconcile_tick_secs(),
            min_interval_secs: default_reconcile_min_secs(),
        }
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_receipt_initial_ms(),
            poll_interval_ms: default_receipt_poll_ms(),
            max_polls: default_receipt_max_polls(),
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ledger_url: String::new(),
            api_key: String::new(),
            policy: RewardPolicy::default(),
            source: default_reward_source(),
            timeout_ms: default_reward_timeout_ms(),
            points: RewardPoints::default(),
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            max_bet_per_user_wei: default_max_bet(),
            min_duration_secs: default_min_duration(),
            max_duration_secs: default_max_duration(),
            max_question_len: default_max_question_len(),
            receipt_poll_ms: default_action_receipt_poll_ms(),
            receipt_timeout_secs: default_action_receipt_timeout_secs(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backend: MirrorBackend::default(),
            url: default_valkey_url(),
            prefix: default_prefix(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for
    /// URLs and secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Defaults plus environment (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.overlay_env();
        config
    }

    /// Secrets never live in the file; URLs may be overridden per deployment.
    fn overlay_env(&mut self) {
        if let Some(url) = env_nonempty("LEDGERSYNC_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Some(url) = env_nonempty("LEDGERSYNC_FALLBACK_RPC_URL") {
            self.chain.fallback_rpc_url = url;
        }
        if let Some(addr) = env_nonempty("LEDGERSYNC_CONTRACT") {
            self.chain.contract_address = addr;
        }
        if let Some(key) = env_nonempty("LEDGERSYNC_PRIVATE_KEY") {
            self.actions.private_key = key;
        }
        if let Some(key) = env_nonempty("LEDGERSYNC_REWARD_API_KEY") {
            self.rewards.api_key = key;
        }
        if let Some(url) = env_nonempty("LEDGERSYNC_REWARD_URL") {
            self.rewards.ledger_url = url;
        }
        if let Some(url) = env_nonempty("LEDGERSYNC_VALKEY_URL") {
            self.mirror.url = url;
        }
    }

    pub fn contract(&self) -> Result<Address, ConfigError> {
        let raw = self.chain.contract_address.trim();
        if raw.is_empty() {
            return Err(ConfigError::Missing("chain.contract_address".into()));
        }
        Address::from_str(raw).map_err(|_| ConfigError::Invalid {
            field: "chain.contract_address".into(),
            value: raw.to_string(),
        })
    }

    pub fn fallback_rpc_url(&self) -> Option<&str> {
        let url = self.chain.fallback_rpc_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn can_sign(&self) -> bool {
        !self.actions.private_key.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.chain.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.chain.retry_base_ms),
            max_attempts: self.chain.retry_attempts.max(1),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            concurrency: self.chain.resync_concurrency.max(1),
            backfill_limit: self.chain.backfill_limit,
            max_markets: self.sync.max_markets.max(1),
        }
    }

    pub fn receipt_policy(&self) -> ReceiptPolicy {
        ReceiptPolicy {
            initial_delay: Duration::from_millis(self.receipts.initial_delay_ms),
            poll_interval: Duration::from_millis(self.receipts.poll_interval_ms),
            max_polls: self.receipts.max_polls.max(1),
        }
    }

    pub fn action_settings(&self) -> Result<ActionSettings, ConfigError> {
        let raw = self.actions.max_bet_per_user_wei.trim();
        let max_bet_per_user = U256::from_str(raw).map_err(|_| ConfigError::Invalid {
            field: "actions.max_bet_per_user_wei".into(),
            value: raw.to_string(),
        })?;
        Ok(ActionSettings {
            chain_id: self.chain.chain_id,
            max_bet_per_user,
            min_duration_secs: self.actions.min_duration_secs,
            max_duration_secs: self.actions.max_duration_secs,
            max_question_len: self.actions.max_question_len,
            receipt_poll_interval: Duration::from_millis(self.actions.receipt_poll_ms),
            receipt_timeout: Duration::from_secs(self.actions.receipt_timeout_secs),
            reward_policy: self.rewards.policy,
        })
    }
}
