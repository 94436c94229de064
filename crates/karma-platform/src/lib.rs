pub mod config;
pub mod contracts;
pub mod db;
pub mod pg;
pub mod redis_bus;
pub mod runtime;

pub use config::ServiceConfig;
pub use contracts::{
    AdminDecisionRequest, ComposePreviewRequest, ComposePreviewResponse, RedeemHttpRequest,
    RedemptionCreatedEvent, RedemptionDecisionResponse, SettlementFailedEvent,
};
pub use db::{connect_database, ensure_schema};
pub use pg::{PgCatalog, PgEventStore, PgPointsLedger, PgRedemptionStore};
pub use redis_bus::{REDEMPTION_CREATED_CHANNEL, RedisBus, SETTLEMENT_FAILED_CHANNEL};
pub use runtime::{PgOrchestrator, build_orchestrator, orchestrator_settings};
