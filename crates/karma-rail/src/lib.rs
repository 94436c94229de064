//! Simulated blockchain settlement.
//!
//! No chain is contacted. The adapter waits for a configurable latency, then either confirms the
//! transfer with a fresh hash and block number or reports it as failed, at a configurable rate.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use karma_core::{BlockchainNetwork, BlockchainTransaction, TransactionStatus};
use karma_tools::RailTool;
use rand::Rng;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

const EVM_TREASURY: &str = "0x7d3A3b9C2e4F5a6B8c9D0e1F2a3B4c5D6e7F8a9B";
const SOLANA_TREASURY: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

#[derive(Debug, Clone)]
pub struct SimulatedRailConfig {
    pub latency: Duration,
    /// Probability in `0.0..=1.0` that a settlement comes back failed.
    pub failure_rate: f64,
}

impl Default for SimulatedRailConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(250),
            failure_rate: 0.0,
        }
    }
}

pub struct SimulatedRail {
    config: SimulatedRailConfig,
    blocks: AtomicU64,
}

impl SimulatedRail {
    pub fn new(config: SimulatedRailConfig) -> Self {
        Self {
            config,
            blocks: AtomicU64::new(0),
        }
    }

    pub fn treasury_address(network: BlockchainNetwork) -> &'static str {
        match network {
            BlockchainNetwork::Solana => SOLANA_TREASURY,
            _ => EVM_TREASURY,
        }
    }

    fn base_height(network: BlockchainNetwork) -> u64 {
        match network {
            BlockchainNetwork::Ethereum => 19_800_000,
            BlockchainNetwork::Polygon => 57_000_000,
            BlockchainNetwork::Bsc => 38_500_000,
            BlockchainNetwork::Solana => 265_000_000,
        }
    }

    fn roll_failure(&self) -> Option<&'static str> {
        let rate = self.config.failure_rate.clamp(0.0, 1.0);
        if rate == 0.0 {
            return None;
        }

        let mut rng = rand::rng();
        if !rng.random_bool(rate) {
            return None;
        }
        if rng.random_bool(0.5) {
            Some("network unreachable")
        } else {
            Some("confirmation timed out")
        }
    }
}

impl Default for SimulatedRail {
    fn default() -> Self {
        Self::new(SimulatedRailConfig::default())
    }
}

fn transaction_hash(
    id: Uuid,
    network: BlockchainNetwork,
    from_address: &str,
    amount: Decimal,
    nanos: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(network.as_str().as_bytes());
    hasher.update(from_address.as_bytes());
    hasher.update(amount.to_string().as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();

    match network {
        BlockchainNetwork::Solana => format!("{digest:x}"),
        _ => format!("0x{digest:x}"),
    }
}

#[async_trait]
impl RailTool for SimulatedRail {
    async fn settle(
        &self,
        amount: Decimal,
        currency: &str,
        network: BlockchainNetwork,
        from_address: &str,
    ) -> anyhow::Result<BlockchainTransaction> {
        if amount <= Decimal::ZERO {
            anyhow::bail!("settlement amount must be positive");
        }
        if !network.is_valid_address(from_address) {
            anyhow::bail!("invalid {network} address: {from_address}");
        }

        tokio::time::sleep(self.config.latency).await;

        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
        let hash = transaction_hash(id, network, from_address, amount, nanos);

        let (status, block_number, failure_reason) = match self.roll_failure() {
            Some(reason) => {
                warn!("simulated {network} settlement {hash} failed: {reason}");
                (TransactionStatus::Failed, None, Some(reason.to_string()))
            }
            None => {
                let height =
                    Self::base_height(network) + self.blocks.fetch_add(1, Ordering::Relaxed);
                info!("simulated {network} settlement {hash} confirmed at block {height}");
                (TransactionStatus::Confirmed, Some(height), None)
            }
        };

        Ok(BlockchainTransaction {
            id,
            hash,
            network,
            from_address: from_address.trim().to_string(),
            to_address: Self::treasury_address(network).to_string(),
            amount,
            currency: currency.to_string(),
            gas_fee: network.simulated_gas_fee(),
            block_number,
            status,
            failure_reason,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn rail(failure_rate: f64) -> SimulatedRail {
        SimulatedRail::new(SimulatedRailConfig {
            latency: Duration::ZERO,
            failure_rate,
        })
    }

    #[tokio::test]
    async fn confirmed_settlement_carries_hash_fee_and_block() {
        let rail = rail(0.0);
        let tx = rail
            .settle(Decimal::new(352, 2), "MATIC", BlockchainNetwork::Polygon, WALLET)
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert!(tx.hash.starts_with("0x"));
        assert_eq!(tx.hash.len(), 66);
        assert_eq!(tx.gas_fee, BlockchainNetwork::Polygon.simulated_gas_fee());
        assert_eq!(tx.to_address, EVM_TREASURY);
        assert!(tx.block_number.is_some());
        assert!(tx.failure_reason.is_none());
    }

    #[tokio::test]
    async fn hashes_and_blocks_are_unique() {
        let rail = rail(0.0);
        let first = rail
            .settle(Decimal::ONE, "ETH", BlockchainNetwork::Ethereum, WALLET)
            .await
            .unwrap();
        let second = rail
            .settle(Decimal::ONE, "ETH", BlockchainNetwork::Ethereum, WALLET)
            .await
            .unwrap();

        assert_ne!(first.hash, second.hash);
        assert_ne!(first.block_number, second.block_number);
    }

    #[tokio::test]
    async fn certain_failure_returns_a_failed_record() {
        let rail = rail(1.0);
        let tx = rail
            .settle(Decimal::ONE, "MATIC", BlockchainNetwork::Polygon, WALLET)
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(tx.block_number.is_none());
        assert!(tx.failure_reason.is_some());
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        let rail = rail(0.0);
        assert!(
            rail.settle(Decimal::ZERO, "MATIC", BlockchainNetwork::Polygon, WALLET)
                .await
                .is_err()
        );
        assert!(
            rail.settle(Decimal::ONE, "SOL", BlockchainNetwork::Solana, WALLET)
                .await
                .is_err()
        );
    }
}
