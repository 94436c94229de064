use karma_core::{
    BlockchainNetwork, ExchangeRateProvider, PaymentBreakdown, PaymentMethod, ValidationError,
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

const DEFAULT_NETWORK: BlockchainNetwork = BlockchainNetwork::Polygon;
const LOCAL_SCALE: u32 = 2;
const RAIL_SCALE: u32 = 8;

/// What the user picked in the payment form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentChoice {
    #[serde(default)]
    pub points_to_use: u64,
    #[serde(default)]
    pub use_blockchain: bool,
    #[serde(default)]
    pub use_cash: bool,
    /// Share of the post-points remainder sent to the blockchain rail when both rails are on.
    pub blockchain_split_percent: Option<Decimal>,
    pub network: Option<BlockchainNetwork>,
    pub wallet_address: Option<String>,
}

impl PaymentChoice {
    pub fn network(&self) -> BlockchainNetwork {
        self.network.unwrap_or(DEFAULT_NETWORK)
    }

    pub fn wallet_address(&self) -> Option<&str> {
        self.wallet_address
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Most points that can go towards `price` without paying more than it in points.
pub fn max_points_for_price(price: Decimal, points_to_local: Decimal) -> u64 {
    if points_to_local <= Decimal::ZERO || price <= Decimal::ZERO {
        return 0;
    }
    (price / points_to_local)
        .floor()
        .to_u64()
        .unwrap_or(u64::MAX)
}

/// Splits `price` across points, the blockchain rail and cash.
///
/// Pure over its inputs and `rates`. On success the three portions, valued in local currency,
/// add up to at least `price`.
pub fn compose(
    price: Decimal,
    points_balance: u64,
    choice: &PaymentChoice,
    rates: &dyn ExchangeRateProvider,
) -> Result<PaymentBreakdown, ValidationError> {
    if price <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePrice);
    }

    let points_rate = rates.points_to_local();
    let points_to_use = choice.points_to_use;
    if points_to_use > points_balance {
        return Err(ValidationError::InsufficientPoints {
            requested: points_to_use,
            available: points_balance,
        });
    }
    let max_points = max_points_for_price(price, points_rate);
    if points_to_use > max_points {
        return Err(ValidationError::PointsExceedPrice {
            requested: points_to_use,
            max: max_points,
        });
    }

    if let Some(percent) = choice.blockchain_split_percent {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(ValidationError::InvalidSplit(percent));
        }
    }

    let network = choice.network();
    if choice.use_blockchain {
        let Some(address) = choice.wallet_address() else {
            return Err(ValidationError::InvalidWalletAddress(String::new()));
        };
        if !network.is_valid_address(address) {
            return Err(ValidationError::InvalidWalletAddress(address.to_string()));
        }
    }

    let points_value = Decimal::from(points_to_use) * points_rate;
    let remaining = (price - points_value).max(Decimal::ZERO);

    let (chain_local, cash_amount) = match (choice.use_blockchain, choice.use_cash) {
        (true, false) => (remaining, Decimal::ZERO),
        (false, true) => (Decimal::ZERO, remaining),
        (true, true) => {
            let percent = choice
                .blockchain_split_percent
                .unwrap_or(Decimal::from(50));
            let chain = (remaining * percent / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(LOCAL_SCALE, RoundingStrategy::ToZero);
            (chain, remaining - chain)
        }
        (false, false) => {
            if remaining > Decimal::ZERO {
                return Err(ValidationError::InsufficientCoverage {
                    required: price,
                    covered: points_value,
                });
            }
            (Decimal::ZERO, Decimal::ZERO)
        }
    };

    let blockchain_amount = if chain_local > Decimal::ZERO {
        let rail_rate = rates.local_to_rail(network);
        if rail_rate <= Decimal::ZERO {
            return Err(ValidationError::InsufficientCoverage {
                required: price,
                covered: points_value + cash_amount,
            });
        }
        // Rounded up so the rail amount never buys less than its local share.
        (chain_local * rail_rate).round_dp_with_strategy(RAIL_SCALE, RoundingStrategy::AwayFromZero)
    } else {
        Decimal::ZERO
    };

    let total_value_local = points_value + chain_local + cash_amount;
    if total_value_local < price {
        return Err(ValidationError::InsufficientCoverage {
            required: price,
            covered: total_value_local,
        });
    }

    let payment_method = PaymentMethod::from_portions(
        points_to_use > 0,
        blockchain_amount > Decimal::ZERO,
        cash_amount > Decimal::ZERO,
    )
    .ok_or(ValidationError::InsufficientCoverage {
        required: price,
        covered: Decimal::ZERO,
    })?;

    let has_chain = blockchain_amount > Decimal::ZERO;
    Ok(PaymentBreakdown {
        points_used: points_to_use,
        points_value,
        blockchain_amount,
        blockchain_currency: has_chain.then(|| network.native_currency().to_string()),
        blockchain_network: has_chain.then_some(network),
        blockchain_value_local: chain_local,
        cash_amount,
        total_value_local,
        payment_method,
    })
}
