use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::RedemptionStatus;

/// Rejections raised while composing a payment. None of them mutate state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payment covers {covered} of a {required} price")]
    InsufficientCoverage { required: Decimal, covered: Decimal },

    #[error("invalid wallet address: {0}")]
    InvalidWalletAddress(String),

    #[error("split percentage {0} is outside 0..=100")]
    InvalidSplit(Decimal),

    #[error("requested {requested} points but only {available} are available")]
    InsufficientPoints { requested: u64, available: u64 },

    #[error("requested {requested} points but the price allows at most {max}")]
    PointsExceedPrice { requested: u64, max: u64 },

    #[error("reward price must be positive")]
    NonPositivePrice,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCoverage { .. } => "INSUFFICIENT_COVERAGE",
            Self::InvalidWalletAddress(_) => "INVALID_WALLET_ADDRESS",
            Self::InvalidSplit(_) => "INVALID_SPLIT",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::PointsExceedPrice { .. } => "POINTS_EXCEED_PRICE",
            Self::NonPositivePrice => "NON_POSITIVE_PRICE",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedemptionError {
    #[error("reward {0} not found or inactive")]
    RewardNotFound(Uuid),

    #[error("reward {0} is out of stock")]
    OutOfStock(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("delivery address and contact are required for this reward")]
    MissingDeliveryInfo,

    #[error("redemption {0} not found")]
    RedemptionNotFound(Uuid),

    #[error("cannot move redemption from {from} to {to}")]
    InvalidTransition {
        from: RedemptionStatus,
        to: RedemptionStatus,
    },

    #[error("blockchain settlement for redemption {0} is not confirmed")]
    SettlementUnconfirmed(Uuid),

    #[error("idempotency key {0} was already used for a different request")]
    IdempotencyKeyReused(String),

    #[error("settlement {transaction_id} confirmed after redemption {redemption_id} left pending")]
    SettlementOrphaned {
        redemption_id: Uuid,
        transaction_id: Uuid,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RedemptionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::OutOfStock(_) => "OUT_OF_STOCK",
            Self::Validation(err) => err.code(),
            Self::MissingDeliveryInfo => "MISSING_DELIVERY_INFO",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SettlementUnconfirmed(_) => "SETTLEMENT_UNCONFIRMED",
            Self::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            Self::SettlementOrphaned { .. } => "SETTLEMENT_ORPHANED",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Caller-fixable rejections; everything else is an infrastructure or state conflict.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::RewardNotFound(_)
                | Self::OutOfStock(_)
                | Self::Validation(_)
                | Self::MissingDeliveryInfo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_pass_through() {
        let err = RedemptionError::from(ValidationError::InvalidWalletAddress(String::new()));
        assert_eq!(err.code(), "INVALID_WALLET_ADDRESS");
        assert!(err.is_validation());

        let err = RedemptionError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.code(), "STORAGE_FAILURE");
        assert!(!err.is_validation());
    }
}
