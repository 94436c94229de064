use std::sync::Arc;

use async_trait::async_trait;
use karma_core::{BlockchainNetwork, BlockchainTransaction, Reward, Wallet};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Reward catalog owned by the catalog service.
#[async_trait]
pub trait CatalogTool: Send + Sync {
    async fn get_reward(&self, reward_id: Uuid) -> anyhow::Result<Option<Reward>>;
    /// Takes one unit iff `quantity_available > 0`, as a single atomic step.
    async fn decrement_stock(&self, reward_id: Uuid) -> anyhow::Result<bool>;
    async fn restore_stock(&self, reward_id: Uuid) -> anyhow::Result<()>;
}

/// Karma Points balances owned by the identity service.
#[async_trait]
pub trait PointsTool: Send + Sync {
    async fn balance(&self, user_id: Uuid) -> anyhow::Result<u64>;
    /// Deducts `amount` iff the balance covers it, as a single atomic step.
    async fn debit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<bool>;
    async fn credit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<()>;
    async fn linked_wallet(&self, user_id: Uuid) -> anyhow::Result<Option<Wallet>>;
}

/// Settlement rail for the blockchain portion of a payment.
#[async_trait]
pub trait RailTool: Send + Sync {
    async fn settle(
        &self,
        amount: Decimal,
        currency: &str,
        network: BlockchainNetwork,
        from_address: &str,
    ) -> anyhow::Result<BlockchainTransaction>;
}

#[async_trait]
impl<T: CatalogTool + ?Sized> CatalogTool for Arc<T> {
    async fn get_reward(&self, reward_id: Uuid) -> anyhow::Result<Option<Reward>> {
        (**self).get_reward(reward_id).await
    }

    async fn decrement_stock(&self, reward_id: Uuid) -> anyhow::Result<bool> {
        (**self).decrement_stock(reward_id).await
    }

    async fn restore_stock(&self, reward_id: Uuid) -> anyhow::Result<()> {
        (**self).restore_stock(reward_id).await
    }
}

#[async_trait]
impl<T: PointsTool + ?Sized> PointsTool for Arc<T> {
    async fn balance(&self, user_id: Uuid) -> anyhow::Result<u64> {
        (**self).balance(user_id).await
    }

    async fn debit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<bool> {
        (**self).debit(user_id, amount).await
    }

    async fn credit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<()> {
        (**self).credit(user_id, amount).await
    }

    async fn linked_wallet(&self, user_id: Uuid) -> anyhow::Result<Option<Wallet>> {
        (**self).linked_wallet(user_id).await
    }
}

#[async_trait]
impl<T: RailTool + ?Sized> RailTool for Arc<T> {
    async fn settle(
        &self,
        amount: Decimal,
        currency: &str,
        network: BlockchainNetwork,
        from_address: &str,
    ) -> anyhow::Result<BlockchainTransaction> {
        (**self).settle(amount, currency, network, from_address).await
    }
}
