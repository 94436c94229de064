use anyhow::{Context, Result};
use futures_util::StreamExt;
use karma_core::{Redemption, RedemptionStatus};
use karma_platform::{
    PgOrchestrator, RedisBus, SETTLEMENT_FAILED_CHANNEL, ServiceConfig, SettlementFailedEvent,
    build_orchestrator, connect_database, ensure_schema,
};
use karma_redemption::{AgentLoop, ReconciliationAgent};
use redis::Msg;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "karma_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    ensure_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let orchestrator = build_orchestrator(&config, pool)?;
    let agent = ReconciliationAgent::new(orchestrator.clone());

    let mut pubsub = redis.subscribe(&[SETTLEMENT_FAILED_CHANNEL]).await?;
    let mut messages = pubsub.on_message();
    let mut sweep = tokio::time::interval(config.reconcile_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "ops worker subscribed to {SETTLEMENT_FAILED_CHANNEL}, sweeping every {:?}",
        config.reconcile_interval
    );

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                if let Err(err) = agent.tick().await {
                    error!("reconciliation sweep failed: {err:#}");
                }
            }
            msg = messages.next() => {
                let msg = msg.with_context(|| {
                    format!("{SETTLEMENT_FAILED_CHANNEL} stream ended unexpectedly")
                })?;
                if let Err(err) = handle_message(&orchestrator, msg).await {
                    error!("failed to process message: {err:#}");
                }
            }
        }
    }
}

async fn handle_message(orchestrator: &PgOrchestrator, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event = parse_event(&payload)?;
    info!(
        "settlement for redemption {} failed on {} after {} attempt(s): {}",
        event.redemption_id, event.network, event.attempts, event.reason
    );

    let redemption = orchestrator.reconcile(event.redemption_id).await?;
    log_outcome(&redemption);
    Ok(())
}

fn parse_event(payload: &str) -> Result<SettlementFailedEvent> {
    serde_json::from_str(payload).context("malformed settlement failure event")
}

fn log_outcome(redemption: &Redemption) {
    match redemption.status {
        RedemptionStatus::Cancelled => warn!(
            "redemption {} cancelled: {}",
            redemption.id,
            redemption.cancel_reason.as_deref().unwrap_or("no reason recorded")
        ),
        _ if redemption.awaiting_settlement() => info!(
            "redemption {} still awaiting settlement after {} attempt(s)",
            redemption.id, redemption.settlement_attempts
        ),
        _ => info!("redemption {} settled", redemption.id),
    }
}
