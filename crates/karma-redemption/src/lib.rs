pub mod idempotency;
pub mod orchestrator;
pub mod receipt;
pub mod reconcile;

use anyhow::Result;
use async_trait::async_trait;

pub use idempotency::IdempotencyWindow;
pub use orchestrator::{OrchestratorSettings, RedeemOutcome, RedeemRequest, RedemptionOrchestrator};
pub use receipt::{ReceiptView, verification_token};
pub use reconcile::ReconciliationAgent;

/// A unit of background work driven by a scheduler loop.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    async fn tick(&self) -> Result<()>;
}
