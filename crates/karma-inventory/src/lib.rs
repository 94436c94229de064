use async_trait::async_trait;
use dashmap::DashMap;
use karma_core::Reward;
use karma_tools::CatalogTool;
use tracing::warn;
use uuid::Uuid;

/// Unit-level stock movements on a reward.
pub trait StockPosition {
    /// Takes one unit. Returns `false` and leaves the count untouched when none is left.
    fn reserve(&mut self) -> bool;
    fn release(&mut self);
}

impl StockPosition for Reward {
    fn reserve(&mut self) -> bool {
        if !self.active || self.quantity_available == 0 {
            return false;
        }
        self.quantity_available -= 1;
        true
    }

    fn release(&mut self) {
        self.quantity_available = self.quantity_available.saturating_add(1);
    }
}

/// Catalog kept in process memory. Each reward sits behind its own shard entry lock, so the
/// check-and-decrement in `decrement_stock` cannot interleave with another caller's.
#[derive(Default)]
pub struct InMemoryCatalog {
    rewards: DashMap<Uuid, Reward>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, reward: Reward) {
        self.rewards.insert(reward.id, reward);
    }

    pub fn quantity_available(&self, reward_id: Uuid) -> Option<u32> {
        self.rewards
            .get(&reward_id)
            .map(|reward| reward.quantity_available)
    }
}

#[async_trait]
impl CatalogTool for InMemoryCatalog {
    async fn get_reward(&self, reward_id: Uuid) -> anyhow::Result<Option<Reward>> {
        Ok(self.rewards.get(&reward_id).map(|reward| reward.clone()))
    }

    async fn decrement_stock(&self, reward_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .rewards
            .get_mut(&reward_id)
            .is_some_and(|mut reward| reward.reserve()))
    }

    async fn restore_stock(&self, reward_id: Uuid) -> anyhow::Result<()> {
        match self.rewards.get_mut(&reward_id) {
            Some(mut reward) => reward.release(),
            None => warn!("restore_stock for unknown reward {reward_id}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use karma_core::RewardCategory;
    use rust_decimal::Decimal;

    use super::*;

    fn reward(quantity: u32) -> Reward {
        Reward {
            id: Uuid::new_v4(),
            title: "Reusable bottle".to_string(),
            price_npr: Some(Decimal::from(500)),
            price_points: None,
            quantity_available: quantity,
            category: RewardCategory::Merchandise,
            active: true,
        }
    }

    #[tokio::test]
    async fn decrement_stops_at_zero() {
        let catalog = InMemoryCatalog::new();
        let item = reward(1);
        let id = item.id;
        catalog.upsert(item);

        assert!(catalog.decrement_stock(id).await.unwrap());
        assert!(!catalog.decrement_stock(id).await.unwrap());
        assert_eq!(catalog.quantity_available(id), Some(0));

        catalog.restore_stock(id).await.unwrap();
        assert_eq!(catalog.quantity_available(id), Some(1));
    }

    #[tokio::test]
    async fn inactive_and_unknown_rewards_never_reserve() {
        let catalog = InMemoryCatalog::new();
        let mut item = reward(5);
        item.active = false;
        let id = item.id;
        catalog.upsert(item);

        assert!(!catalog.decrement_stock(id).await.unwrap());
        assert!(!catalog.decrement_stock(Uuid::new_v4()).await.unwrap());
        assert_eq!(catalog.quantity_available(id), Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decrements_take_each_unit_once() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let item = reward(3);
        let id = item.id;
        catalog.upsert(item);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(
                async move { catalog.decrement_stock(id).await },
            ));
        }

        let mut taken = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                taken += 1;
            }
        }

        assert_eq!(taken, 3);
        assert_eq!(catalog.quantity_available(id), Some(0));
    }
}
