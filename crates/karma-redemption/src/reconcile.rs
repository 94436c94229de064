use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use karma_core::RedemptionStatus;
use karma_tools::{CatalogTool, PointsTool, RailTool};
use tracing::{info, warn};

use crate::{AgentLoop, orchestrator::RedemptionOrchestrator};

const DEFAULT_BATCH: usize = 50;

/// Sweeps pending redemptions whose blockchain leg has not confirmed and retries them.
pub struct ReconciliationAgent<TCatalog, TPoints, TRail>
where
    TCatalog: CatalogTool,
    TPoints: PointsTool,
    TRail: RailTool,
{
    orchestrator: Arc<RedemptionOrchestrator<TCatalog, TPoints, TRail>>,
    batch: usize,
}

impl<TCatalog, TPoints, TRail> ReconciliationAgent<TCatalog, TPoints, TRail>
where
    TCatalog: CatalogTool,
    TPoints: PointsTool,
    TRail: RailTool,
{
    pub fn new(orchestrator: Arc<RedemptionOrchestrator<TCatalog, TPoints, TRail>>) -> Self {
        Self {
            orchestrator,
            batch: DEFAULT_BATCH,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }
}

#[async_trait]
impl<TCatalog, TPoints, TRail> AgentLoop for ReconciliationAgent<TCatalog, TPoints, TRail>
where
    TCatalog: CatalogTool,
    TPoints: PointsTool,
    TRail: RailTool,
{
    async fn tick(&self) -> Result<()> {
        let candidates = self.orchestrator.awaiting_settlement(self.batch).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let (mut settled, mut cancelled) = (0usize, 0usize);
        for candidate in candidates {
            match self.orchestrator.reconcile(candidate.id).await {
                Ok(redemption) if redemption.status == RedemptionStatus::Cancelled => {
                    cancelled += 1
                }
                Ok(redemption) if !redemption.awaiting_settlement() => settled += 1,
                Ok(_) => {}
                Err(err) => warn!("reconcile of redemption {} failed: {err}", candidate.id),
            }
        }

        info!("reconciliation sweep settled {settled}, cancelled {cancelled}");
        Ok(())
    }
}
