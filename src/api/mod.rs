//! Axum HTTP surface over the mirror, the settlement calculator and the
//! action orchestrator.
//!
//! Reads:
//!   GET  /api/markets?filter=&sort=            → market listings
//!   GET  /api/markets/:id                      → one mirror row
//!   GET  /api/markets/:id/claimable/:user      → claimable view
//!   GET  /api/users/:user/positions            → positions with payouts
//!   GET  /api/status                           → sync + action status
//!
//! Writes (need a signing key):
//!   POST /api/markets                          → create market
//!   POST /api/markets/:id/bets                 → place bet
//!   POST /api/markets/:id/resolve              → resolve
//!   POST /api/markets/:id/claim                → claim
//!   POST /api/claim-all                        → claim every payout
//!   POST /api/rewards/grant                    → verified reward grant

use crate::actions::{ActionError, ActionOrchestrator};
use crate::chain::{Side, VerificationError};
use crate::mirror::{list_markets, MarketFilter, MarketSort, MirrorError, MirrorStore};
use crate::reconcile::Reconciler;
use crate::rewards::{RewardCategory, RewardError, RewardGateway};
use crate::settlement::{SettlementCalculator, SettlementError};
use crate::sync::SyncEngine;
use alloy::primitives::{Address, B256, U256};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub mirror: Arc<dyn MirrorStore>,
    pub sync: Arc<SyncEngine>,
    pub settlement: SettlementCalculator,
    /// `None` in read-only deployments (no signing key).
    pub actions: Option<Arc<ActionOrchestrator>>,
    pub rewards: Option<Arc<RewardGateway>>,
    pub reconciler: Option<Arc<Reconciler>>,
}

impl ApiState {
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        let mirror = sync.mirror();
        Self {
            settlement: SettlementCalculator::new(mirror.clone()),
            mirror,
            sync,
            actions: None,
            rewards: None,
            reconciler: None,
        }
    }

    pub fn with_actions(mut self, actions: Arc<ActionOrchestrator>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_rewards(mut self, rewards: Arc<RewardGateway>) -> Self {
        self.rewards = Some(rewards);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    fn actions(&self) -> Result<&ActionOrchestrator, ApiError> {
        self.actions
            .as_deref()
            .ok_or(ApiError::Unavailable("actions are disabled (no signing key)"))
    }
}

/// Build the Axum router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/markets", get(api_markets).post(api_create_market))
        .route("/api/markets/:id", get(api_market))
        .route("/api/markets/:id/claimable/:user", get(api_claimable))
        .route("/api/markets/:id/bets", post(api_place_bet))
        .route("/api/markets/:id/resolve", post(api_resolve))
        .route("/api/markets/:id/claim", post(api_claim))
        .route("/api/claim-all", post(api_claim_all))
        .route("/api/users/:user/positions", get(api_positions))
        .route("/api/rewards/grant", post(api_grant))
        .route("/api/status", get(api_status))
        .with_state(state)
}

/// Start the API server.
pub async fn serve(state: ApiState, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Action(ActionError),
    Reward(RewardError),
    Settlement(SettlementError),
    Mirror(MirrorError),
    NotFound(String),
    Unavailable(&'static str),
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        ApiError::Action(e)
    }
}

impl From<RewardError> for ApiError {
    fn from(e: RewardError) -> Self {
        ApiError::Reward(e)
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError::Settlement(e)
    }
}

impl From<MirrorError> for ApiError {
    fn from(e: MirrorError) -> Self {
        ApiError::Mirror(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Action(e) => match e {
                ActionError::Validation(_) => StatusCode::BAD_REQUEST,
                ActionError::SimulationRevert(_) | ActionError::OnChainRevert { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ActionError::UserCancelled => StatusCode::CONFLICT,
                ActionError::Rpc(_) => StatusCode::BAD_GATEWAY,
                ActionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ActionError::Mirror(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Reward(e) => match e {
                RewardError::Verification(VerificationError::Rpc(_)) => StatusCode::BAD_GATEWAY,
                RewardError::Verification(_) | RewardError::CategoryMismatch { .. } => {
                    StatusCode::FORBIDDEN
                }
                RewardError::ZeroAmount | RewardError::AboveRate { .. } => StatusCode::BAD_REQUEST,
                RewardError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RewardError::Request(_) | RewardError::Ledger { .. } => StatusCode::BAD_GATEWAY,
            },
            ApiError::Settlement(SettlementError::UnknownMarket(_)) => StatusCode::NOT_FOUND,
            ApiError::Settlement(_) | ApiError::Mirror(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Action(e) => e.to_string(),
            ApiError::Reward(e) => e.to_string(),
            ApiError::Settlement(e) => e.to_string(),
            ApiError::Mirror(e) => e.to_string(),
            ApiError::NotFound(what) => format!("{what} not found"),
            ApiError::Unavailable(why) => why.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "api request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

// ─── Read handlers ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    filter: MarketFilter,
    #[serde(default)]
    sort: MarketSort,
}

async fn api_markets(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let listings = list_markets(state.mirror.as_ref(), query.filter, query.sort, now_secs()).await?;
    Ok(Json(listings).into_response())
}

async fn api_market(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    match state.mirror.get_market(id).await? {
        Some(market) => Ok(Json(market).into_response()),
        None => Err(ApiError::NotFound(format!("market {id}"))),
    }
}

async fn api_claimable(
    State(state): State<ApiState>,
    Path((id, user)): Path<(u64, Address)>,
) -> Result<Response, ApiError> {
    let view = state.settlement.get_claimable(id, user).await?;
    Ok(Json(view).into_response())
}

async fn api_positions(
    State(state): State<ApiState>,
    Path(user): Path<Address>,
) -> Result<Response, ApiError> {
    let positions = state.settlement.user_positions(user).await?;
    Ok(Json(positions).into_response())
}

async fn api_status(State(state): State<ApiState>) -> impl IntoResponse {
    let action = state.actions.as_ref().map(|a| a.status());
    let signer = state.actions.as_ref().map(|a| a.sender());
    Json(serde_json::json!({
        "degraded": state.sync.is_degraded(),
        "last_sync": state.sync.last_report(),
        "last_backfill": state.sync.last_backfill(),
        "action": action,
        "signer": signer,
        "rewards_enabled": state.rewards.is_some(),
        "reconciler": state.reconciler.is_some(),
    }))
}

// ─── Action handlers ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateMarketBody {
    question: String,
    duration_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct PlaceBetBody {
    side: Side,
    amount: U256,
}

async fn api_create_market(
    State(state): State<ApiState>,
    Json(body): Json<CreateMarketBody>,
) -> Result<Response, ApiError> {
    let receipt = state
        .actions()?
        .create_market(&body.question, body.duration_seconds)
        .await?;
    Ok(Json(receipt).into_response())
}

async fn api_place_bet(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<PlaceBetBody>,
) -> Result<Response, ApiError> {
    let receipt = state.actions()?.place_bet(id, body.side, body.amount).await?;
    Ok(Json(receipt).into_response())
}

async fn api_resolve(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let receipt = state.actions()?.resolve(id).await?;
    Ok(Json(receipt).into_response())
}

async fn api_claim(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let receipt = state.actions()?.claim(id).await?;
    Ok(Json(receipt).into_response())
}

async fn api_claim_all(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let attempts = state.actions()?.claim_all().await?;
    Ok(Json(attempts).into_response())
}

/// The amount is not client-controlled: it is the configured rate for `category`.
#[derive(Debug, Deserialize)]
struct GrantBody {
    wallet: Address,
    category: RewardCategory,
    tx_hash: B256,
    chain_id: u64,
}

async fn api_grant(
    State(state): State<ApiState>,
    Json(body): Json<GrantBody>,
) -> Result<Response, ApiError> {
    let gateway = state
        .rewards
        .as_ref()
        .ok_or(ApiError::Unavailable("rewards are disabled"))?;
    let amount = gateway.points_for(body.category);
    let outcome = gateway
        .grant_if_verified(body.wallet, amount, body.category, body.tx_hash, body.chain_id)
        .await?;
    Ok(Json(outcome).into_response())
}
