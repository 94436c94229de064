use std::sync::Arc;

use chrono::Utc;
use karma_core::{
    EventEnvelope, EventStore, Receipt, ReceiptStatus, Redemption, RedemptionError,
    RedemptionStatus, RedemptionStore,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const TOKEN_LEN: usize = 16;

/// Short upper-case hex token binding a receipt to its redemption.
///
/// The creation time is hashed at microsecond precision so the token survives a database
/// round-trip.
pub fn verification_token(secret: &str, redemption: &Redemption) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(redemption.id.as_bytes());
    hasher.update(redemption.user_id.as_bytes());
    hasher.update(redemption.reward_id.as_bytes());
    hasher.update(redemption.created_at.timestamp_micros().to_le_bytes());
    let digest = format!("{:X}", hasher.finalize());
    digest[..TOKEN_LEN].to_string()
}

pub fn scan_payload(redemption_id: Uuid, token: &str) -> String {
    format!("karma://receipt/{redemption_id}?token={token}")
}

fn guidance(redemption: &Redemption) -> Option<String> {
    match redemption.status {
        RedemptionStatus::Pending => {
            if let Some(tx) = redemption.transaction.as_ref().filter(|tx| tx.is_failed()) {
                let reason = tx.failure_reason.as_deref().unwrap_or("unknown error");
                return Some(format!(
                    "Blockchain payment did not settle ({reason}). \
                     Await confirmation, the transfer is retried automatically."
                ));
            }
            if redemption.awaiting_settlement() {
                return Some("Awaiting blockchain confirmation.".to_string());
            }
            Some("Awaiting approval.".to_string())
        }
        RedemptionStatus::Approved => {
            Some("Payment received. The reward is being prepared.".to_string())
        }
        RedemptionStatus::Completed => None,
        RedemptionStatus::Cancelled => {
            let refund = match (redemption.payment.points_used, redemption.points_refunded) {
                (0, _) => "",
                (_, true) => " Points used have been refunded.",
                (_, false) => " The points refund is still being processed.",
            };
            Some(match redemption.cancel_reason.as_deref() {
                Some(reason) => format!("Cancelled: {reason}.{refund}"),
                None => format!("Cancelled.{refund}"),
            })
        }
    }
}

/// Read-only projection of redemptions into receipts and audit trails.
pub struct ReceiptView {
    store: Arc<dyn RedemptionStore>,
    events: Arc<dyn EventStore>,
    secret: String,
}

impl ReceiptView {
    pub fn new(
        store: Arc<dyn RedemptionStore>,
        events: Arc<dyn EventStore>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            secret: secret.into(),
        }
    }

    pub async fn view(&self, redemption_id: Uuid) -> Result<Receipt, RedemptionError> {
        let redemption = self.load(redemption_id).await?;
        Ok(self.project(&redemption))
    }

    pub async fn ledger(&self, redemption_id: Uuid) -> Result<Vec<EventEnvelope>, RedemptionError> {
        self.load(redemption_id).await?;
        Ok(self.events.stream(redemption_id).await?)
    }

    pub fn verify(&self, redemption: &Redemption, token: &str) -> bool {
        verification_token(&self.secret, redemption).eq_ignore_ascii_case(token.trim())
    }

    /// Display status is derived from the redemption's current state on every call.
    pub fn project(&self, redemption: &Redemption) -> Receipt {
        let token = verification_token(&self.secret, redemption);
        let transaction = redemption.transaction.as_ref();

        Receipt {
            redemption_id: redemption.id,
            reward_id: redemption.reward_id,
            reward_title: redemption.reward_title.clone(),
            user_id: redemption.user_id,
            payment: redemption.payment.clone(),
            transaction_hash: transaction
                .map(|tx| tx.hash.clone())
                .filter(|hash| !hash.is_empty()),
            transaction_status: transaction.map(|tx| tx.status),
            redemption_status: redemption.status,
            display_status: ReceiptStatus::from(redemption.status),
            guidance: guidance(redemption),
            scan_payload: scan_payload(redemption.id, &token),
            verification_token: token,
            created_at: redemption.created_at,
            issued_at: Utc::now(),
        }
    }

    async fn load(&self, redemption_id: Uuid) -> Result<Redemption, RedemptionError> {
        self.store
            .get(redemption_id)
            .await?
            .ok_or(RedemptionError::RedemptionNotFound(redemption_id))
    }
}
