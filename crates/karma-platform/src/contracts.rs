use chrono::{DateTime, Utc};
use karma_core::{
    BlockchainNetwork, DeliveryInfo, PaymentBreakdown, PaymentMethod, Receipt, Redemption,
    RedemptionStatus,
};
use karma_finance::PaymentChoice;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemHttpRequest {
    pub user_id: Uuid,
    pub reward_id: Uuid,
    #[serde(default)]
    pub payment: PaymentChoice,
    pub delivery: Option<DeliveryInfo>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposePreviewRequest {
    pub user_id: Uuid,
    pub reward_id: Uuid,
    #[serde(default)]
    pub payment: PaymentChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposePreviewResponse {
    pub reward_id: Uuid,
    pub breakdown: PaymentBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDecisionRequest {
    pub decided_by: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionDecisionResponse {
    pub redemption: Redemption,
    pub receipt: Receipt,
    pub decided_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionCreatedEvent {
    pub redemption_id: Uuid,
    pub user_id: Uuid,
    pub reward_id: Uuid,
    pub payment_method: PaymentMethod,
    pub points_used: u64,
    pub blockchain_amount: Decimal,
    pub cash_amount: Decimal,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Redemption> for RedemptionCreatedEvent {
    fn from(redemption: &Redemption) -> Self {
        Self {
            redemption_id: redemption.id,
            user_id: redemption.user_id,
            reward_id: redemption.reward_id,
            payment_method: redemption.payment.payment_method,
            points_used: redemption.payment.points_used,
            blockchain_amount: redemption.payment.blockchain_amount,
            cash_amount: redemption.payment.cash_amount,
            status: redemption.status,
            created_at: redemption.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementFailedEvent {
    pub redemption_id: Uuid,
    pub transaction_id: Uuid,
    pub network: BlockchainNetwork,
    pub reason: String,
    pub attempts: u32,
}

impl SettlementFailedEvent {
    /// Present only when the redemption's latest settlement attempt failed.
    pub fn from_redemption(redemption: &Redemption) -> Option<Self> {
        let tx = redemption.transaction.as_ref().filter(|tx| tx.is_failed())?;
        Some(Self {
            redemption_id: redemption.id,
            transaction_id: tx.id,
            network: tx.network,
            reason: tx.failure_reason.clone().unwrap_or_default(),
            attempts: redemption.settlement_attempts,
        })
    }
}
