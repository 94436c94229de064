use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::BlockchainNetwork;

/// Conversion factors used when composing a payment.
pub trait ExchangeRateProvider: Send + Sync {
    fn name(&self) -> &'static str;
    /// Local currency (NPR) value of one Karma Point.
    fn points_to_local(&self) -> Decimal;
    /// Units of the network's native currency bought by one unit of local currency.
    fn local_to_rail(&self, network: BlockchainNetwork) -> Decimal;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticExchangeRates {
    pub points_to_npr: Decimal,
    pub npr_to_usd: Decimal,
    pub eth_usd: Decimal,
    pub matic_usd: Decimal,
    pub bnb_usd: Decimal,
    pub sol_usd: Decimal,
}

impl Default for StaticExchangeRates {
    fn default() -> Self {
        Self {
            points_to_npr: Decimal::ONE,
            npr_to_usd: Decimal::new(75, 4),
            eth_usd: Decimal::from(3200),
            matic_usd: Decimal::new(85, 2),
            bnb_usd: Decimal::from(580),
            sol_usd: Decimal::from(150),
        }
    }
}

impl StaticExchangeRates {
    pub fn usd_price(&self, network: BlockchainNetwork) -> Decimal {
        match network {
            BlockchainNetwork::Ethereum => self.eth_usd,
            BlockchainNetwork::Polygon => self.matic_usd,
            BlockchainNetwork::Bsc => self.bnb_usd,
            BlockchainNetwork::Solana => self.sol_usd,
        }
    }
}

impl ExchangeRateProvider for StaticExchangeRates {
    fn name(&self) -> &'static str {
        "static"
    }

    fn points_to_local(&self) -> Decimal {
        self.points_to_npr
    }

    fn local_to_rail(&self, network: BlockchainNetwork) -> Decimal {
        let usd_price = self.usd_price(network);
        if usd_price.is_zero() {
            return Decimal::ZERO;
        }
        self.npr_to_usd / usd_price
    }
}
