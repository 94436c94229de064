pub mod error;
pub mod events;
pub mod models;
pub mod rates;
pub mod storage;

pub use error::{RedemptionError, ValidationError};
pub use events::{DomainEvent, DomainEventKind};
pub use models::{
    BlockchainNetwork, BlockchainTransaction, DeliveryInfo, PaymentBreakdown, PaymentMethod,
    Receipt, ReceiptStatus, Redemption, RedemptionStatus, RedemptionWarning, ReleaseStep, Reward,
    RewardCategory, TransactionStatus, Wallet,
};
pub use rates::{ExchangeRateProvider, StaticExchangeRates};
pub use storage::{EventEnvelope, EventStore, InsertOutcome, RedemptionStore};
