use std::sync::Arc;

use anyhow::{Context, Result};
use karma_rail::{SimulatedRail, SimulatedRailConfig};
use karma_redemption::{OrchestratorSettings, RedemptionOrchestrator};
use sqlx::PgPool;

use crate::{
    config::ServiceConfig,
    pg::{PgCatalog, PgEventStore, PgPointsLedger, PgRedemptionStore},
};

pub type PgOrchestrator = RedemptionOrchestrator<PgCatalog, PgPointsLedger, SimulatedRail>;

pub fn orchestrator_settings(config: &ServiceConfig) -> Result<OrchestratorSettings> {
    Ok(OrchestratorSettings {
        idempotency_window: chrono::Duration::from_std(config.idempotency_window)
            .context("IDEMPOTENCY_WINDOW_SECS is out of range")?,
        settlement_timeout: config.settlement_timeout,
        max_settlement_attempts: config.max_settlement_attempts,
        receipt_secret: config.receipt_secret.clone(),
    })
}

/// Wires the orchestrator to Postgres and the simulated rail.
pub fn build_orchestrator(config: &ServiceConfig, pool: PgPool) -> Result<Arc<PgOrchestrator>> {
    let rail = SimulatedRail::new(SimulatedRailConfig {
        latency: config.rail_latency,
        failure_rate: config.rail_failure_rate,
    });

    Ok(Arc::new(RedemptionOrchestrator::new(
        PgCatalog::new(pool.clone()),
        PgPointsLedger::new(pool.clone()),
        rail,
        Arc::new(config.rates.clone()),
        Arc::new(PgRedemptionStore::new(pool.clone())),
        Arc::new(PgEventStore::new(pool)),
        orchestrator_settings(config)?,
    )))
}
