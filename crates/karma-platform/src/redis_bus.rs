use anyhow::{Context, Result};
use redis::{AsyncCommands, Client, aio::PubSub};
use serde::Serialize;
use tracing::debug;

pub const REDEMPTION_CREATED_CHANNEL: &str = "redemptions.created";
pub const SETTLEMENT_FAILED_CHANNEL: &str = "redemptions.settlement_failed";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        debug!("published to {channel} ({receivers} receivers)");
        Ok(())
    }

    pub async fn subscribe(&self, channels: &[&str]) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .with_context(|| format!("failed to subscribe to {channel}"))?;
        }
        Ok(pubsub)
    }
}
