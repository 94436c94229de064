use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomainEventKind {
    StockReserved,
    StockRestored,
    PointsDebited,
    PointsRefunded,
    RailSettlementConfirmed,
    RailSettlementFailed,
    RailSettlementOrphaned,
    RedemptionCreated,
    RedemptionApproved,
    RedemptionCompleted,
    RedemptionCancelled,
}

impl DomainEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockReserved => "StockReserved",
            Self::StockRestored => "StockRestored",
            Self::PointsDebited => "PointsDebited",
            Self::PointsRefunded => "PointsRefunded",
            Self::RailSettlementConfirmed => "RailSettlementConfirmed",
            Self::RailSettlementFailed => "RailSettlementFailed",
            Self::RailSettlementOrphaned => "RailSettlementOrphaned",
            Self::RedemptionCreated => "RedemptionCreated",
            Self::RedemptionApproved => "RedemptionApproved",
            Self::RedemptionCompleted => "RedemptionCompleted",
            Self::RedemptionCancelled => "RedemptionCancelled",
        }
    }
}

impl std::str::FromStr for DomainEventKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let kind = match value {
            "StockReserved" => Self::StockReserved,
            "StockRestored" => Self::StockRestored,
            "PointsDebited" => Self::PointsDebited,
            "PointsRefunded" => Self::PointsRefunded,
            "RailSettlementConfirmed" => Self::RailSettlementConfirmed,
            "RailSettlementFailed" => Self::RailSettlementFailed,
            "RailSettlementOrphaned" => Self::RailSettlementOrphaned,
            "RedemptionCreated" => Self::RedemptionCreated,
            "RedemptionApproved" => Self::RedemptionApproved,
            "RedemptionCompleted" => Self::RedemptionCompleted,
            "RedemptionCancelled" => Self::RedemptionCancelled,
            other => anyhow::bail!("unknown domain event kind: {other}"),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(aggregate_id: Uuid, kind: DomainEventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            kind,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
