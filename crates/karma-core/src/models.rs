use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Merchandise,
    Voucher,
    Experience,
    Donation,
}

impl RewardCategory {
    /// Physical rewards ship to the user and need an address and contact.
    pub fn requires_delivery(&self) -> bool {
        matches!(self, Self::Merchandise)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merchandise => "merchandise",
            Self::Voucher => "voucher",
            Self::Experience => "experience",
            Self::Donation => "donation",
        }
    }
}

impl FromStr for RewardCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merchandise" => Ok(Self::Merchandise),
            "voucher" => Ok(Self::Voucher),
            "experience" => Ok(Self::Experience),
            "donation" => Ok(Self::Donation),
            other => anyhow::bail!("unsupported reward category: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reward {
    pub id: Uuid,
    pub title: String,
    pub price_npr: Option<Decimal>,
    pub price_points: Option<u64>,
    pub quantity_available: u32,
    pub category: RewardCategory,
    pub active: bool,
}

impl Reward {
    /// Price in local currency. A points-only price is converted with `points_to_local`.
    pub fn local_price(&self, points_to_local: Decimal) -> Option<Decimal> {
        self.price_npr
            .filter(|price| *price > Decimal::ZERO)
            .or_else(|| {
                self.price_points
                    .filter(|points| *points > 0)
                    .map(|points| Decimal::from(points) * points_to_local)
            })
    }

    pub fn in_stock(&self) -> bool {
        self.quantity_available > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainNetwork {
    Ethereum,
    Polygon,
    Bsc,
    Solana,
}

impl BlockchainNetwork {
    pub const ALL: [BlockchainNetwork; 4] = [
        BlockchainNetwork::Ethereum,
        BlockchainNetwork::Polygon,
        BlockchainNetwork::Bsc,
        BlockchainNetwork::Solana,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Bsc => "bsc",
            Self::Solana => "solana",
        }
    }

    pub fn native_currency(&self) -> &'static str {
        match self {
            Self::Ethereum => "ETH",
            Self::Polygon => "MATIC",
            Self::Bsc => "BNB",
            Self::Solana => "SOL",
        }
    }

    /// Flat gas fee charged by the simulated rail, in the native currency.
    pub fn simulated_gas_fee(&self) -> Decimal {
        match self {
            Self::Ethereum => Decimal::new(21, 4),
            Self::Polygon => Decimal::new(1, 2),
            Self::Bsc => Decimal::new(5, 4),
            Self::Solana => Decimal::new(5, 6),
        }
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        let address = address.trim();
        match self {
            Self::Ethereum | Self::Polygon | Self::Bsc => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            Self::Solana => {
                (32..=44).contains(&address.len())
                    && address.chars().all(|c| BASE58_ALPHABET.contains(c))
            }
        }
    }
}

impl fmt::Display for BlockchainNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockchainNetwork {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "polygon" | "matic" => Ok(Self::Polygon),
            "bsc" | "bnb" => Ok(Self::Bsc),
            "solana" | "sol" => Ok(Self::Solana),
            other => anyhow::bail!("unsupported blockchain network: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub address: String,
    pub network: BlockchainNetwork,
    pub currency: String,
    pub balance: Decimal,
}

/// Which rails carry a non-zero share of a payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    PointsOnly,
    BlockchainOnly,
    CashOnly,
    PointsBlockchain,
    PointsCash,
    BlockchainCash,
    AllThree,
}

impl PaymentMethod {
    /// Returns `None` when every portion is zero: a reward is never free.
    pub fn from_portions(points: bool, blockchain: bool, cash: bool) -> Option<Self> {
        match (points, blockchain, cash) {
            (true, false, false) => Some(Self::PointsOnly),
            (false, true, false) => Some(Self::BlockchainOnly),
            (false, false, true) => Some(Self::CashOnly),
            (true, true, false) => Some(Self::PointsBlockchain),
            (true, false, true) => Some(Self::PointsCash),
            (false, true, true) => Some(Self::BlockchainCash),
            (true, true, true) => Some(Self::AllThree),
            (false, false, false) => None,
        }
    }

    pub fn uses_points(&self) -> bool {
        matches!(
            self,
            Self::PointsOnly | Self::PointsBlockchain | Self::PointsCash | Self::AllThree
        )
    }

    pub fn uses_blockchain(&self) -> bool {
        matches!(
            self,
            Self::BlockchainOnly | Self::PointsBlockchain | Self::BlockchainCash | Self::AllThree
        )
    }

    pub fn uses_cash(&self) -> bool {
        matches!(
            self,
            Self::CashOnly | Self::PointsCash | Self::BlockchainCash | Self::AllThree
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointsOnly => "points_only",
            Self::BlockchainOnly => "blockchain_only",
            Self::CashOnly => "cash_only",
            Self::PointsBlockchain => "points_blockchain",
            Self::PointsCash => "points_cash",
            Self::BlockchainCash => "blockchain_cash",
            Self::AllThree => "all_three",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentBreakdown {
    pub points_used: u64,
    pub points_value: Decimal,
    pub blockchain_amount: Decimal,
    pub blockchain_currency: Option<String>,
    pub blockchain_network: Option<BlockchainNetwork>,
    pub blockchain_value_local: Decimal,
    pub cash_amount: Decimal,
    pub total_value_local: Decimal,
    pub payment_method: PaymentMethod,
}

impl PaymentBreakdown {
    pub fn has_blockchain_leg(&self) -> bool {
        self.blockchain_amount > Decimal::ZERO
    }

    pub fn covers(&self, price: Decimal) -> bool {
        self.points_value + self.blockchain_value_local + self.cash_amount >= price
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockchainTransaction {
    pub id: Uuid,
    pub hash: String,
    pub network: BlockchainNetwork,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub currency: String,
    pub gas_fee: Decimal,
    pub block_number: Option<u64>,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BlockchainTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TransactionStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
}

impl RedemptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Approved, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Approved, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedemptionStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("unsupported redemption status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub address: String,
    pub contact: String,
}

impl DeliveryInfo {
    /// Trimmed copy, or `None` when either field is blank.
    pub fn normalized(&self) -> Option<Self> {
        let address = self.address.trim();
        let contact = self.contact.trim();
        if address.is_empty() || contact.is_empty() {
            return None;
        }

        Some(Self {
            address: address.to_string(),
            contact: contact.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedemptionWarning {
    RailSettlementFailed {
        transaction_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Redemption {
    pub id: Uuid,
    pub reward_id: Uuid,
    pub reward_title: String,
    pub user_id: Uuid,
    pub payment: PaymentBreakdown,
    pub transaction: Option<BlockchainTransaction>,
    pub delivery: Option<DeliveryInfo>,
    pub status: RedemptionStatus,
    pub idempotency_key: Option<String>,
    /// Digest of the request that created the redemption, compared on idempotent retries.
    #[serde(default)]
    pub request_fingerprint: Option<String>,
    #[serde(default)]
    pub warnings: Vec<RedemptionWarning>,
    pub settlement_attempts: u32,
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub stock_restored: bool,
    #[serde(default)]
    pub points_refunded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Redemption {
    /// True while a blockchain portion exists without a confirmed transaction.
    pub fn awaiting_settlement(&self) -> bool {
        self.payment.has_blockchain_leg()
            && !self
                .transaction
                .as_ref()
                .is_some_and(BlockchainTransaction::is_confirmed)
    }

    /// True once a cancelled redemption has handed back its stock unit and any points it used.
    pub fn is_released(&self) -> bool {
        self.stock_restored && (self.points_refunded || self.payment.points_used == 0)
    }

    /// Stamps the timestamp columns that belong to `status`.
    pub fn apply_status(&mut self, status: RedemptionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        match status {
            RedemptionStatus::Approved => self.approved_at = Some(at),
            RedemptionStatus::Completed => self.completed_at = Some(at),
            RedemptionStatus::Cancelled => self.cancelled_at = Some(at),
            RedemptionStatus::Pending => {}
        }
    }
}

/// Restoration owed by a cancelled redemption. Each one is claimed separately in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    Stock,
    Points,
}

impl ReleaseStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock_restored",
            Self::Points => "points_refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Pending,
    Paid,
    Void,
}

impl From<RedemptionStatus> for ReceiptStatus {
    fn from(status: RedemptionStatus) -> Self {
        match status {
            RedemptionStatus::Pending => Self::Pending,
            RedemptionStatus::Approved | RedemptionStatus::Completed => Self::Paid,
            RedemptionStatus::Cancelled => Self::Void,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    pub redemption_id: Uuid,
    pub reward_id: Uuid,
    pub reward_title: String,
    pub user_id: Uuid,
    pub payment: PaymentBreakdown,
    pub transaction_hash: Option<String>,
    pub transaction_status: Option<TransactionStatus>,
    pub redemption_status: RedemptionStatus,
    pub display_status: ReceiptStatus,
    pub guidance: Option<String>,
    pub verification_token: String,
    pub scan_payload: String,
    pub created_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}
