use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use karma_core::{EventEnvelope, Receipt, Redemption, RedemptionError};
use karma_platform::{
    AdminDecisionRequest, ComposePreviewRequest, ComposePreviewResponse, PgOrchestrator,
    REDEMPTION_CREATED_CHANNEL, RedeemHttpRequest, RedemptionCreatedEvent,
    RedemptionDecisionResponse, RedisBus, SETTLEMENT_FAILED_CHANNEL, ServiceConfig,
    SettlementFailedEvent, build_orchestrator, connect_database, ensure_schema,
};
use karma_redemption::{RedeemOutcome, RedeemRequest};
use tracing::{error, info, warn};
use uuid::Uuid;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<PgOrchestrator>,
    redis: RedisBus,
    config: Arc<ServiceConfig>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "karma_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    ensure_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let orchestrator = build_orchestrator(&config, pool)?;

    let addr: SocketAddr = config.http_addr.parse()?;
    let state = AppState {
        orchestrator,
        redis,
        config: Arc::new(config),
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/redemptions", post(create_redemption))
        .route("/redemptions/{redemption_id}/approve", post(approve_redemption))
        .route("/redemptions/{redemption_id}/complete", post(complete_redemption))
        .route("/redemptions/{redemption_id}/cancel", post(cancel_redemption))
        .route("/redemptions/{redemption_id}/reconcile", post(reconcile_redemption))
        .route("/redemptions/{redemption_id}/receipt", get(get_receipt))
        .route("/redemptions/{redemption_id}/ledger", get(get_ledger))
        .route("/payments/compose", post(preview_payment))
        .with_state(state);

    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_redemption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RedeemHttpRequest>,
) -> Result<(StatusCode, Json<RedeemOutcome>), (StatusCode, String)> {
    let idempotency_key = resolve_idempotency_key(&headers, payload.idempotency_key.as_deref())
        .map_err(invalid_request)?;
    let request = RedeemRequest {
        user_id: payload.user_id,
        reward_id: payload.reward_id,
        payment: payload.payment,
        delivery: payload.delivery,
        idempotency_key,
    };

    let outcome = state
        .orchestrator
        .redeem(request)
        .await
        .map_err(redemption_error)?;

    if outcome.replayed {
        return Ok((StatusCode::OK, Json(outcome)));
    }

    let created = RedemptionCreatedEvent::from(&outcome.redemption);
    if let Err(err) = state
        .redis
        .publish_json(REDEMPTION_CREATED_CHANNEL, &created)
        .await
    {
        error!("failed to publish redemption event: {err:#}");
    }
    publish_settlement_failure(&state.redis, &outcome.redemption).await;

    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn approve_redemption(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
    Json(payload): Json<AdminDecisionRequest>,
) -> Result<Json<RedemptionDecisionResponse>, (StatusCode, String)> {
    let decided_by = ensure_admin(&state.config, &payload.decided_by)?;
    let redemption = state
        .orchestrator
        .approve(redemption_id)
        .await
        .map_err(redemption_error)?;
    Ok(decision(&state, redemption, decided_by))
}

async fn complete_redemption(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
    Json(payload): Json<AdminDecisionRequest>,
) -> Result<Json<RedemptionDecisionResponse>, (StatusCode, String)> {
    let decided_by = ensure_admin(&state.config, &payload.decided_by)?;
    let redemption = state
        .orchestrator
        .complete(redemption_id)
        .await
        .map_err(redemption_error)?;
    Ok(decision(&state, redemption, decided_by))
}

async fn cancel_redemption(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
    Json(payload): Json<AdminDecisionRequest>,
) -> Result<Json<RedemptionDecisionResponse>, (StatusCode, String)> {
    let decided_by = ensure_admin(&state.config, &payload.decided_by)?;
    let redemption = state
        .orchestrator
        .cancel(redemption_id, payload.reason.as_deref())
        .await
        .map_err(redemption_error)?;
    Ok(decision(&state, redemption, decided_by))
}

async fn reconcile_redemption(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
    Json(payload): Json<AdminDecisionRequest>,
) -> Result<Json<RedemptionDecisionResponse>, (StatusCode, String)> {
    let decided_by = ensure_admin(&state.config, &payload.decided_by)?;
    let redemption = state
        .orchestrator
        .reconcile(redemption_id)
        .await
        .map_err(redemption_error)?;
    Ok(decision(&state, redemption, decided_by))
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
) -> Result<Json<Receipt>, (StatusCode, String)> {
    let receipt = state
        .orchestrator
        .receipts()
        .view(redemption_id)
        .await
        .map_err(redemption_error)?;
    Ok(Json(receipt))
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(redemption_id): Path<Uuid>,
) -> Result<Json<Vec<EventEnvelope>>, (StatusCode, String)> {
    let ledger = state
        .orchestrator
        .receipts()
        .ledger(redemption_id)
        .await
        .map_err(redemption_error)?;
    Ok(Json(ledger))
}

async fn preview_payment(
    State(state): State<AppState>,
    Json(payload): Json<ComposePreviewRequest>,
) -> Result<Json<ComposePreviewResponse>, (StatusCode, String)> {
    let breakdown = state
        .orchestrator
        .preview(payload.user_id, payload.reward_id, &payload.payment)
        .await
        .map_err(redemption_error)?;
    Ok(Json(ComposePreviewResponse {
        reward_id: payload.reward_id,
        breakdown,
    }))
}

fn decision(
    state: &AppState,
    redemption: Redemption,
    decided_by: String,
) -> Json<RedemptionDecisionResponse> {
    info!(
        "redemption {} is {} (by {decided_by})",
        redemption.id, redemption.status
    );
    Json(RedemptionDecisionResponse {
        receipt: state.orchestrator.receipts().project(&redemption),
        redemption,
        decided_by,
    })
}

async fn publish_settlement_failure(redis: &RedisBus, redemption: &Redemption) {
    let Some(event) = SettlementFailedEvent::from_redemption(redemption) else {
        return;
    };
    warn!(
        "redemption {} created with a failed {} settlement: {}",
        event.redemption_id, event.network, event.reason
    );
    if let Err(err) = redis.publish_json(SETTLEMENT_FAILED_CHANNEL, &event).await {
        error!("failed to publish settlement failure: {err:#}");
    }
}

/// The header wins over the body field when both are present.
fn resolve_idempotency_key(
    headers: &HeaderMap,
    body_key: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| anyhow::anyhow!("Idempotency-Key header must be visible ASCII"))?;

    let key = header_key
        .or(body_key)
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if key.is_some_and(|key| key.len() > 255) {
        anyhow::bail!("idempotency key must be at most 255 characters");
    }
    Ok(key.map(str::to_string))
}

fn ensure_admin(config: &ServiceConfig, decided_by: &str) -> Result<String, (StatusCode, String)> {
    let decided_by = decided_by.trim();
    if decided_by.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "decided_by is required".to_string(),
        ));
    }
    if !config.is_admin(decided_by) {
        return Err((
            StatusCode::FORBIDDEN,
            format!("{decided_by} is not an admin actor"),
        ));
    }
    Ok(decided_by.to_string())
}

fn redemption_status(err: &RedemptionError) -> StatusCode {
    match err {
        RedemptionError::RewardNotFound(_) | RedemptionError::RedemptionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        RedemptionError::OutOfStock(_)
        | RedemptionError::InvalidTransition { .. }
        | RedemptionError::SettlementUnconfirmed(_)
        | RedemptionError::IdempotencyKeyReused(_)
        | RedemptionError::SettlementOrphaned { .. } => StatusCode::CONFLICT,
        RedemptionError::Validation(_) | RedemptionError::MissingDeliveryInfo => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RedemptionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn redemption_error(err: RedemptionError) -> (StatusCode, String) {
    let status = redemption_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("redemption request failed: {err:#}");
        return internal_error(err.code());
    }
    (status, format!("{}: {err}", err.code()))
}

fn invalid_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
