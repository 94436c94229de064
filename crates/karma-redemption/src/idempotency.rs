use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

const PURGE_THRESHOLD: usize = 1024;

/// Result remembered for one idempotency key.
#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub redemption_id: Uuid,
    pub fingerprint: String,
    pub stored_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }
}

pub type IdempotencySlot = Arc<AsyncMutex<Option<IdempotencyEntry>>>;

/// Per-key slots that serialize retries of the same request.
///
/// A caller holds the slot lock for the whole redemption, so a concurrent retry with the same key
/// waits and then observes the stored result instead of redeeming a second time.
pub struct IdempotencyWindow {
    ttl: Duration,
    slots: Mutex<HashMap<String, IdempotencySlot>>,
}

impl IdempotencyWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn slot(&self, user_id: Uuid, key: &str) -> IdempotencySlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() >= PURGE_THRESHOLD {
            self.purge(&mut slots);
        }
        slots.entry(format!("{user_id}:{key}")).or_default().clone()
    }

    pub fn is_fresh(&self, entry: &IdempotencyEntry) -> bool {
        Utc::now() - entry.stored_at < self.ttl
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops slots nobody else references that are empty or expired.
    fn purge(&self, slots: &mut HashMap<String, IdempotencySlot>) {
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry.as_ref().is_some_and(|entry| self.is_fresh(entry)),
                Err(_) => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stored_at: DateTime<Utc>) -> IdempotencyEntry {
        IdempotencyEntry {
            redemption_id: Uuid::new_v4(),
            fingerprint: "a1b2".to_string(),
            stored_at,
        }
    }

    #[tokio::test]
    async fn same_key_shares_a_slot_per_user() {
        let window = IdempotencyWindow::new(Duration::minutes(10));
        let user = Uuid::new_v4();

        let first = window.slot(user, "req-1");
        let second = window.slot(user, "req-1");
        assert!(Arc::ptr_eq(&first, &second));

        let other_user = window.slot(Uuid::new_v4(), "req-1");
        assert!(!Arc::ptr_eq(&first, &other_user));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn freshness_follows_the_ttl() {
        let window = IdempotencyWindow::new(Duration::minutes(10));
        assert!(window.is_fresh(&entry(Utc::now())));
        assert!(!window.is_fresh(&entry(Utc::now() - Duration::minutes(11))));
    }

    #[tokio::test]
    async fn purge_keeps_live_and_referenced_slots() {
        let window = IdempotencyWindow::new(Duration::minutes(10));
        let user = Uuid::new_v4();

        let held = window.slot(user, "held");
        *window.slot(user, "fresh").lock().await = Some(entry(Utc::now()));
        *window.slot(user, "stale").lock().await = Some(entry(Utc::now() - Duration::hours(1)));
        window.slot(user, "empty");

        {
            let mut slots = window.slots.lock().unwrap();
            window.purge(&mut slots);
        }

        let slots = window.slots.lock().unwrap();
        assert!(slots.contains_key(&format!("{user}:held")));
        assert!(slots.contains_key(&format!("{user}:fresh")));
        assert!(!slots.contains_key(&format!("{user}:stale")));
        assert!(!slots.contains_key(&format!("{user}:empty")));
        drop(held);
    }
}
