use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karma_core::{
    DomainEvent, EventEnvelope, EventStore, InsertOutcome, Redemption, RedemptionStatus,
    RedemptionStore, ReleaseStep,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope>>>,
    sequence: RwLock<i64>,
}

impl InMemoryEventStore {
    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> anyhow::Result<EventEnvelope> {
        let mut sequence_guard = self.sequence.write().await;
        *sequence_guard += 1;

        let envelope = EventEnvelope {
            sequence: *sequence_guard,
            stream_id,
            event,
            stored_at: Utc::now(),
        };

        let mut streams = self.streams.write().await;
        streams.entry(stream_id).or_default().push(envelope.clone());

        Ok(envelope)
    }

    async fn stream(&self, stream_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&stream_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryRedemptionStore {
    records: RwLock<HashMap<Uuid, Redemption>>,
}

impl InMemoryRedemptionStore {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn holds_key(record: &Redemption, user_id: Uuid, key: &str) -> bool {
    record.user_id == user_id && record.idempotency_key.as_deref() == Some(key)
}

#[async_trait]
impl RedemptionStore for InMemoryRedemptionStore {
    async fn insert(
        &self,
        redemption: &Redemption,
        key_since: DateTime<Utc>,
    ) -> anyhow::Result<InsertOutcome> {
        let mut records = self.records.write().await;
        if records.contains_key(&redemption.id) {
            anyhow::bail!("redemption {} already exists", redemption.id);
        }

        if let Some(key) = redemption.idempotency_key.as_deref() {
            let user_id = redemption.user_id;
            if let Some(holder) = records
                .values()
                .find(|record| holds_key(record, user_id, key) && record.created_at >= key_since)
            {
                return Ok(InsertOutcome::KeyHeld(holder.clone()));
            }
            for stale in records
                .values_mut()
                .filter(|record| holds_key(record, user_id, key))
            {
                stale.idempotency_key = None;
            }
        }

        records.insert(redemption.id, redemption.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Redemption>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Option<Redemption>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| holds_key(record, user_id, key) && record.created_at >= since)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Redemption>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&record.status) {
            return Ok(None);
        }

        record.apply_status(to, at);
        if to == RedemptionStatus::Cancelled {
            record.cancel_reason = reason.map(str::to_string);
        }
        Ok(Some(record.clone()))
    }

    async fn save_settlement(&self, redemption: &Redemption) -> anyhow::Result<Option<Redemption>> {
        let mut records = self.records.write().await;
        let Some(record) = records
            .get_mut(&redemption.id)
            .filter(|record| record.status == RedemptionStatus::Pending)
        else {
            return Ok(None);
        };

        record.transaction = redemption.transaction.clone();
        record.settlement_attempts = redemption.settlement_attempts;
        record.warnings = redemption.warnings.clone();
        record.updated_at = redemption.updated_at;
        Ok(Some(record.clone()))
    }

    async fn mark_released(&self, id: Uuid, step: ReleaseStep, done: bool) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        let Some(record) = records
            .get_mut(&id)
            .filter(|record| record.status == RedemptionStatus::Cancelled)
        else {
            return Ok(false);
        };

        let flag = match step {
            ReleaseStep::Stock => &mut record.stock_restored,
            ReleaseStep::Points => &mut record.points_refunded,
        };
        if *flag == done {
            return Ok(false);
        }
        *flag = done;
        Ok(true)
    }

    async fn list_awaiting_settlement(&self, limit: usize) -> anyhow::Result<Vec<Redemption>> {
        let records = self.records.read().await;
        let mut pending: Vec<Redemption> = records
            .values()
            .filter(|record| {
                record.status == RedemptionStatus::Pending
                    && record
                        .transaction
                        .as_ref()
                        .is_some_and(|tx| tx.is_failed())
            })
            .cloned()
            .collect();
        pending.sort_by_key(|record| record.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use karma_core::{DomainEventKind, PaymentBreakdown, PaymentMethod};
    use rust_decimal::Decimal;

    use super::*;

    fn redemption(user_id: Uuid, key: Option<&str>) -> Redemption {
        let now = Utc::now();
        Redemption {
            id: Uuid::new_v4(),
            reward_id: Uuid::new_v4(),
            reward_title: "Bus pass".to_string(),
            user_id,
            payment: PaymentBreakdown {
                points_used: 0,
                points_value: Decimal::ZERO,
                blockchain_amount: Decimal::ZERO,
                blockchain_currency: None,
                blockchain_network: None,
                blockchain_value_local: Decimal::ZERO,
                cash_amount: Decimal::from(300),
                total_value_local: Decimal::from(300),
                payment_method: PaymentMethod::CashOnly,
            },
            transaction: None,
            delivery: None,
            status: RedemptionStatus::Pending,
            idempotency_key: key.map(str::to_string),
            request_fingerprint: None,
            warnings: Vec::new(),
            settlement_attempts: 0,
            cancel_reason: None,
            stock_restored: false,
            points_refunded: false,
            created_at: now,
            updated_at: now,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn event_streams_keep_a_global_sequence() {
        let store = InMemoryEventStore::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        store
            .append(
                first,
                DomainEvent::new(first, DomainEventKind::StockReserved, serde_json::json!({})),
            )
            .await
            .unwrap();
        let envelope = store
            .append(
                second,
                DomainEvent::new(second, DomainEventKind::RedemptionCreated, serde_json::json!({})),
            )
            .await
            .unwrap();

        assert_eq!(envelope.sequence, 2);
        assert_eq!(store.stream(first).await.unwrap().len(), 1);
        assert!(store.stream(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryRedemptionStore::default();
        let record = redemption(Uuid::new_v4(), None);
        store.insert(&record, Utc::now()).await.unwrap();

        let pending_or_approved = [RedemptionStatus::Pending, RedemptionStatus::Approved];
        let cancelled = store
            .transition(
                record.id,
                &pending_or_approved,
                RedemptionStatus::Cancelled,
                Some("duplicate claim"),
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, RedemptionStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("duplicate claim"));
        assert!(cancelled.cancelled_at.is_some());

        let again = store
            .transition(
                record.id,
                &pending_or_approved,
                RedemptionStatus::Cancelled,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn idempotency_lookup_respects_user_and_window() {
        let store = InMemoryRedemptionStore::default();
        let user = Uuid::new_v4();
        let record = redemption(user, Some("req-1"));
        store.insert(&record, Utc::now()).await.unwrap();

        let since = Utc::now() - Duration::minutes(5);
        let found = store
            .find_by_idempotency_key(user, "req-1", since)
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(record.id));

        assert!(
            store
                .find_by_idempotency_key(Uuid::new_v4(), "req-1", since)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_by_idempotency_key(user, "req-1", Utc::now() + Duration::minutes(1))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryRedemptionStore::default();
        let record = redemption(Uuid::new_v4(), None);
        store.insert(&record, Utc::now()).await.unwrap();
        assert!(store.insert(&record, Utc::now()).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn live_key_holder_blocks_a_second_insert() {
        let store = InMemoryRedemptionStore::default();
        let user = Uuid::new_v4();
        let first = redemption(user, Some("req-9"));
        let since = Utc::now() - Duration::hours(24);
        assert_eq!(store.insert(&first, since).await.unwrap(), InsertOutcome::Inserted);

        let second = redemption(user, Some("req-9"));
        match store.insert(&second, since).await.unwrap() {
            InsertOutcome::KeyHeld(holder) => assert_eq!(holder.id, first.id),
            InsertOutcome::Inserted => panic!("key was taken twice"),
        }
        assert!(store.get(second.id).await.unwrap().is_none());

        let other_user = redemption(Uuid::new_v4(), Some("req-9"));
        assert_eq!(store.insert(&other_user, since).await.unwrap(), InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn expired_key_holder_gives_the_key_up() {
        let store = InMemoryRedemptionStore::default();
        let user = Uuid::new_v4();
        let mut old = redemption(user, Some("req-3"));
        old.created_at = Utc::now() - Duration::days(2);
        store.insert(&old, old.created_at).await.unwrap();

        let fresh = redemption(user, Some("req-3"));
        let since = Utc::now() - Duration::hours(24);
        assert_eq!(store.insert(&fresh, since).await.unwrap(), InsertOutcome::Inserted);
        assert!(store.get(old.id).await.unwrap().unwrap().idempotency_key.is_none());
    }

    #[tokio::test]
    async fn settlement_is_only_saved_while_pending() {
        let store = InMemoryRedemptionStore::default();
        let mut record = redemption(Uuid::new_v4(), None);
        store.insert(&record, Utc::now()).await.unwrap();

        record.settlement_attempts = 2;
        let saved = store.save_settlement(&record).await.unwrap().unwrap();
        assert_eq!(saved.settlement_attempts, 2);

        store
            .transition(
                record.id,
                &[RedemptionStatus::Pending],
                RedemptionStatus::Cancelled,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        record.settlement_attempts = 3;
        assert!(store.save_settlement(&record).await.unwrap().is_none());
        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.settlement_attempts, 2);
    }

    #[tokio::test]
    async fn release_steps_are_claimed_once_and_can_be_reopened() {
        let store = InMemoryRedemptionStore::default();
        let record = redemption(Uuid::new_v4(), None);
        store.insert(&record, Utc::now()).await.unwrap();
        assert!(!store.mark_released(record.id, ReleaseStep::Stock, true).await.unwrap());

        store
            .transition(
                record.id,
                &[RedemptionStatus::Pending],
                RedemptionStatus::Cancelled,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(store.mark_released(record.id, ReleaseStep::Points, true).await.unwrap());
        assert!(!store.mark_released(record.id, ReleaseStep::Points, true).await.unwrap());
        assert!(store.mark_released(record.id, ReleaseStep::Points, false).await.unwrap());
        assert!(store.mark_released(record.id, ReleaseStep::Points, true).await.unwrap());

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert!(stored.points_refunded);
        assert!(!stored.stock_restored);
    }
}
