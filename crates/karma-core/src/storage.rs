use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::DomainEvent;
use crate::models::{Redemption, RedemptionStatus, ReleaseStep};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: i64,
    pub stream_id: Uuid,
    pub event: DomainEvent,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> anyhow::Result<EventEnvelope>;
    async fn stream(&self, stream_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Another redemption of the same user holds the idempotency key; nothing was written.
    KeyHeld(Redemption),
}

/// Durable home of redemption records.
///
/// `transition` is a compare-and-set: it applies `to` only when the stored status is one of
/// `from`, and returns the updated record, or `None` when the record is missing or in any other
/// status.
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    /// Stores a new redemption. A record of the same user created at or after `key_since` that
    /// holds the same idempotency key wins over it. Older holders give the key up.
    async fn insert(
        &self,
        redemption: &Redemption,
        key_since: DateTime<Utc>,
    ) -> anyhow::Result<InsertOutcome>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Redemption>>;
    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Option<Redemption>>;
    async fn transition(
        &self,
        id: Uuid,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Redemption>>;
    /// Persists the settlement fields (transaction, attempts, warnings) while the stored record is
    /// still pending. Returns the stored record, or `None` when it is missing or has moved on.
    async fn save_settlement(&self, redemption: &Redemption) -> anyhow::Result<Option<Redemption>>;
    /// Flips one release flag of a cancelled redemption to `done`. Returns false when the record
    /// is not cancelled or the flag already had that value, so one caller claims each step.
    async fn mark_released(&self, id: Uuid, step: ReleaseStep, done: bool) -> anyhow::Result<bool>;
    async fn list_awaiting_settlement(&self, limit: usize) -> anyhow::Result<Vec<Redemption>>;
}
