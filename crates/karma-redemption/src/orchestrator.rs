use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use karma_core::{
    BlockchainNetwork, BlockchainTransaction, DeliveryInfo, DomainEvent, DomainEventKind,
    EventStore, ExchangeRateProvider, InsertOutcome, PaymentBreakdown, Receipt, Redemption,
    RedemptionError, RedemptionStatus, RedemptionStore, RedemptionWarning, ReleaseStep, Reward,
    TransactionStatus, ValidationError,
};
use karma_finance::{PaymentChoice, compose};
use karma_tools::{CatalogTool, PointsTool, RailTool};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    idempotency::{IdempotencyEntry, IdempotencyWindow},
    receipt::ReceiptView,
};

pub const RAIL_FAILURE_REASON: &str = "rail settlement failed";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub idempotency_window: chrono::Duration,
    pub settlement_timeout: Duration,
    pub max_settlement_attempts: u32,
    pub receipt_secret: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            idempotency_window: chrono::Duration::hours(24),
            settlement_timeout: Duration::from_secs(10),
            max_settlement_attempts: 3,
            receipt_secret: "karma-dev-receipt-secret".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub user_id: Uuid,
    pub reward_id: Uuid,
    pub payment: PaymentChoice,
    pub delivery: Option<DeliveryInfo>,
    pub idempotency_key: Option<String>,
}

impl RedeemRequest {
    /// Hex digest of everything that shapes the redemption. Two requests under one idempotency
    /// key are the same retry only when their fingerprints agree.
    pub fn fingerprint(&self) -> String {
        let payment = &self.payment;
        let split = payment
            .blockchain_split_percent
            .map(|percent| percent.normalize().to_string());
        let delivery = self.delivery.as_ref().and_then(DeliveryInfo::normalized);

        let mut hasher = Sha256::new();
        hasher.update(self.reward_id.as_bytes());
        hasher.update(payment.points_to_use.to_le_bytes());
        hasher.update([u8::from(payment.use_blockchain), u8::from(payment.use_cash)]);
        for field in [
            split.as_deref(),
            payment.network.map(|network| network.as_str()),
            payment.wallet_address(),
            delivery.as_ref().map(|delivery| delivery.address.as_str()),
            delivery.as_ref().map(|delivery| delivery.contact.as_str()),
        ] {
            match field {
                Some(value) => {
                    hasher.update([1]);
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0]),
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemOutcome {
    pub redemption: Redemption,
    pub receipt: Receipt,
    pub replayed: bool,
    pub warnings: Vec<RedemptionWarning>,
}

struct ReconcileGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Drives a redemption from reward lookup to a persisted, receipted record and through its
/// admin lifecycle afterwards.
pub struct RedemptionOrchestrator<TCatalog, TPoints, TRail>
where
    TCatalog: CatalogTool,
    TPoints: PointsTool,
    TRail: RailTool,
{
    catalog: TCatalog,
    points: TPoints,
    rail: TRail,
    rates: Arc<dyn ExchangeRateProvider>,
    store: Arc<dyn RedemptionStore>,
    events: Arc<dyn EventStore>,
    idempotency: IdempotencyWindow,
    receipts: ReceiptView,
    settings: OrchestratorSettings,
    reconciling: Mutex<HashSet<Uuid>>,
}

impl<TCatalog, TPoints, TRail> RedemptionOrchestrator<TCatalog, TPoints, TRail>
where
    TCatalog: CatalogTool,
    TPoints: PointsTool,
    TRail: RailTool,
{
    pub fn new(
        catalog: TCatalog,
        points: TPoints,
        rail: TRail,
        rates: Arc<dyn ExchangeRateProvider>,
        store: Arc<dyn RedemptionStore>,
        events: Arc<dyn EventStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let receipts = ReceiptView::new(
            store.clone(),
            events.clone(),
            settings.receipt_secret.clone(),
        );
        Self {
            catalog,
            points,
            rail,
            rates,
            store,
            events,
            idempotency: IdempotencyWindow::new(settings.idempotency_window),
            receipts,
            settings,
            reconciling: Mutex::new(HashSet::new()),
        }
    }

    pub fn receipts(&self) -> &ReceiptView {
        &self.receipts
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn redeem(&self, request: RedeemRequest) -> Result<RedeemOutcome, RedemptionError> {
        let fingerprint = request.fingerprint();
        let key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        let Some(key) = key else {
            return self.process(&request, None, &fingerprint).await;
        };

        let slot = self.idempotency.slot(request.user_id, &key);
        let mut entry = slot.lock().await;

        if let Some(previous) = entry.as_ref().filter(|e| self.idempotency.is_fresh(e)) {
            if !previous.matches(&fingerprint) {
                return Err(RedemptionError::IdempotencyKeyReused(key));
            }
            let redemption = self.load(previous.redemption_id).await?;
            info!("replaying redemption {} for key {key}", redemption.id);
            return Ok(self.outcome(redemption, true));
        }

        let since = Utc::now() - self.idempotency.ttl();
        let outcome = match self
            .store
            .find_by_idempotency_key(request.user_id, &key, since)
            .await?
        {
            Some(stored) => self.replay(stored, &key, &fingerprint)?,
            None => self.process(&request, Some(&key), &fingerprint).await?,
        };

        *entry = Some(IdempotencyEntry {
            redemption_id: outcome.redemption.id,
            fingerprint,
            stored_at: outcome.redemption.created_at,
        });
        Ok(outcome)
    }

    /// Splits the reward price for `choice` without reserving or debiting anything.
    pub async fn preview(
        &self,
        user_id: Uuid,
        reward_id: Uuid,
        choice: &PaymentChoice,
    ) -> Result<PaymentBreakdown, RedemptionError> {
        let reward = self.active_reward(reward_id).await?;
        let price = self.price_of(&reward)?;
        let choice = self.resolve_choice(user_id, choice).await?;
        let balance = self.points.balance(user_id).await?;
        Ok(compose(price, balance, &choice, self.rates.as_ref())?)
    }

    pub async fn approve(&self, redemption_id: Uuid) -> Result<Redemption, RedemptionError> {
        let current = self.load(redemption_id).await?;
        if current.status == RedemptionStatus::Approved {
            return Ok(current);
        }
        if !current.status.can_transition_to(RedemptionStatus::Approved) {
            return Err(RedemptionError::InvalidTransition {
                from: current.status,
                to: RedemptionStatus::Approved,
            });
        }
        if current.awaiting_settlement() {
            return Err(RedemptionError::SettlementUnconfirmed(redemption_id));
        }

        let (approved, _) = self
            .transition(
                redemption_id,
                &[RedemptionStatus::Pending],
                RedemptionStatus::Approved,
                None,
            )
            .await?;
        info!("redemption {redemption_id} approved");
        Ok(approved)
    }

    pub async fn complete(&self, redemption_id: Uuid) -> Result<Redemption, RedemptionError> {
        let current = self.load(redemption_id).await?;
        if current.status == RedemptionStatus::Completed {
            return Ok(current);
        }

        let (completed, _) = self
            .transition(
                redemption_id,
                &[RedemptionStatus::Approved],
                RedemptionStatus::Completed,
                None,
            )
            .await?;
        info!("redemption {redemption_id} completed");
        Ok(completed)
    }

    /// Cancels a pending or approved redemption, restoring its stock unit and refunding points.
    ///
    /// Cancelling an already cancelled redemption retries whichever restoration has not gone
    /// through yet.
    pub async fn cancel(
        &self,
        redemption_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Redemption, RedemptionError> {
        let current = self.load(redemption_id).await?;
        let cancelled = if current.status == RedemptionStatus::Cancelled {
            current
        } else {
            let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
            let (cancelled, won) = self
                .transition(
                    redemption_id,
                    &[RedemptionStatus::Pending, RedemptionStatus::Approved],
                    RedemptionStatus::Cancelled,
                    reason,
                )
                .await?;
            if won {
                info!(
                    "redemption {redemption_id} cancelled: {}",
                    reason.unwrap_or("no reason given")
                );
            }
            cancelled
        };

        if cancelled.is_released() {
            return Ok(cancelled);
        }
        self.release(&cancelled).await?;
        self.load(redemption_id).await
    }

    /// Retries the blockchain leg of a pending redemption whose settlement has not confirmed.
    pub async fn reconcile(&self, redemption_id: Uuid) -> Result<Redemption, RedemptionError> {
        let Some(_guard) = self.begin_reconcile(redemption_id) else {
            return self.load(redemption_id).await;
        };

        let mut redemption = self.load(redemption_id).await?;
        if redemption.status != RedemptionStatus::Pending || !redemption.awaiting_settlement() {
            return Ok(redemption);
        }
        let Some(network) = redemption.payment.blockchain_network else {
            return Ok(redemption);
        };

        let from_address = match redemption.transaction.as_ref() {
            Some(tx) => Some(tx.from_address.clone()),
            None => self
                .points
                .linked_wallet(redemption.user_id)
                .await?
                .filter(|wallet| wallet.network == network)
                .map(|wallet| wallet.address),
        };
        let Some(from_address) = from_address else {
            warn!("redemption {redemption_id} has no wallet to settle from");
            return Ok(redemption);
        };

        let transaction = self
            .settle(&redemption.payment, network, &from_address)
            .await;
        redemption.settlement_attempts += 1;
        redemption.updated_at = Utc::now();
        let failed = transaction.is_failed();
        if failed {
            redemption.warnings.push(RedemptionWarning::RailSettlementFailed {
                transaction_id: transaction.id,
                reason: transaction.failure_reason.clone().unwrap_or_default(),
            });
        }
        redemption.transaction = Some(transaction.clone());
        let Some(saved) = self.store.save_settlement(&redemption).await? else {
            return self.discard_settlement(redemption_id, &transaction).await;
        };
        self.record_settlement(&saved).await;

        if failed && saved.settlement_attempts >= self.settings.max_settlement_attempts {
            warn!(
                "redemption {redemption_id} failed settlement {} times, cancelling",
                saved.settlement_attempts
            );
            return self.cancel(redemption_id, Some(RAIL_FAILURE_REASON)).await;
        }

        if !failed {
            info!("redemption {redemption_id} settled on retry");
        }
        Ok(saved)
    }

    pub async fn awaiting_settlement(
        &self,
        limit: usize,
    ) -> Result<Vec<Redemption>, RedemptionError> {
        Ok(self.store.list_awaiting_settlement(limit).await?)
    }

    async fn process(
        &self,
        request: &RedeemRequest,
        idempotency_key: Option<&str>,
        fingerprint: &str,
    ) -> Result<RedeemOutcome, RedemptionError> {
        let reward = self.active_reward(request.reward_id).await?;
        if !reward.in_stock() {
            return Err(RedemptionError::OutOfStock(reward.id));
        }
        let price = self.price_of(&reward)?;

        let choice = self.resolve_choice(request.user_id, &request.payment).await?;
        let balance = self.points.balance(request.user_id).await?;
        let payment = compose(price, balance, &choice, self.rates.as_ref())?;

        let delivery = request.delivery.as_ref().and_then(DeliveryInfo::normalized);
        if reward.category.requires_delivery() && delivery.is_none() {
            return Err(RedemptionError::MissingDeliveryInfo);
        }

        // Commit phase: nothing above this line has changed any state.
        if !self.catalog.decrement_stock(reward.id).await? {
            return Err(RedemptionError::OutOfStock(reward.id));
        }
        match self.points.debit(request.user_id, payment.points_used).await {
            Ok(true) => {}
            Ok(false) => {
                self.compensate(&reward, request.user_id, 0).await;
                let available = self.points.balance(request.user_id).await?;
                return Err(ValidationError::InsufficientPoints {
                    requested: payment.points_used,
                    available,
                }
                .into());
            }
            Err(err) => {
                self.compensate(&reward, request.user_id, 0).await;
                return Err(err.into());
            }
        }

        let transaction = match (payment.blockchain_network, choice.wallet_address()) {
            (Some(network), Some(address)) if payment.has_blockchain_leg() => {
                Some(self.settle(&payment, network, address).await)
            }
            _ => None,
        };

        let now = Utc::now();
        let mut warnings = Vec::new();
        if let Some(tx) = transaction.as_ref().filter(|tx| tx.is_failed()) {
            warnings.push(RedemptionWarning::RailSettlementFailed {
                transaction_id: tx.id,
                reason: tx.failure_reason.clone().unwrap_or_default(),
            });
        }

        let redemption = Redemption {
            id: Uuid::new_v4(),
            reward_id: reward.id,
            reward_title: reward.title.clone(),
            user_id: request.user_id,
            settlement_attempts: u32::from(transaction.is_some()),
            payment,
            transaction,
            delivery,
            status: RedemptionStatus::Pending,
            idempotency_key: idempotency_key.map(str::to_string),
            request_fingerprint: Some(fingerprint.to_string()),
            warnings,
            cancel_reason: None,
            stock_restored: false,
            points_refunded: false,
            created_at: now,
            updated_at: now,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        let redemption_id = redemption.id;
        let points_used = redemption.payment.points_used;
        let key_since = now - self.idempotency.ttl();
        match self.store.insert(&redemption, key_since).await {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::KeyHeld(holder)) => {
                warn!(
                    "redemption {redemption_id} lost its idempotency key to {}, undoing",
                    holder.id
                );
                self.compensate(&reward, request.user_id, points_used).await;
                if let Some(tx) = redemption.transaction.as_ref().filter(|tx| tx.is_confirmed()) {
                    self.record_orphaned(holder.id, tx).await;
                }
                return self.replay(holder, idempotency_key.unwrap_or_default(), fingerprint);
            }
            Err(err) => {
                error!("failed to persist redemption {redemption_id}: {err:#}");
                self.compensate(&reward, request.user_id, points_used).await;
                return Err(err.into());
            }
        }

        self.record(
            redemption_id,
            DomainEventKind::StockReserved,
            json!({ "reward_id": reward.id }),
        )
        .await;
        if points_used > 0 {
            self.record(
                redemption_id,
                DomainEventKind::PointsDebited,
                json!({ "user_id": request.user_id, "points": points_used }),
            )
            .await;
        }
        if redemption.transaction.is_some() {
            self.record_settlement(&redemption).await;
        }
        self.record(
            redemption_id,
            DomainEventKind::RedemptionCreated,
            json!({
                "user_id": redemption.user_id,
                "reward_id": redemption.reward_id,
                "payment_method": redemption.payment.payment_method,
            }),
        )
        .await;

        info!(
            "redemption {} created for user {} ({})",
            redemption.id,
            redemption.user_id,
            redemption.payment.payment_method.as_str()
        );
        Ok(self.outcome(redemption, false))
    }

    async fn active_reward(&self, reward_id: Uuid) -> Result<Reward, RedemptionError> {
        self.catalog
            .get_reward(reward_id)
            .await?
            .filter(|reward| reward.active)
            .ok_or(RedemptionError::RewardNotFound(reward_id))
    }

    fn price_of(&self, reward: &Reward) -> Result<Decimal, RedemptionError> {
        reward
            .local_price(self.rates.points_to_local())
            .ok_or(ValidationError::NonPositivePrice.into())
    }

    /// Fills a missing wallet address from the user's linked wallet on the chosen network.
    async fn resolve_choice(
        &self,
        user_id: Uuid,
        choice: &PaymentChoice,
    ) -> Result<PaymentChoice, RedemptionError> {
        let mut choice = choice.clone();
        if choice.use_blockchain && choice.wallet_address().is_none() {
            if let Some(wallet) = self.points.linked_wallet(user_id).await? {
                if wallet.network == choice.network() {
                    choice.wallet_address = Some(wallet.address);
                }
            }
        }
        Ok(choice)
    }

    async fn settle(
        &self,
        payment: &PaymentBreakdown,
        network: BlockchainNetwork,
        from_address: &str,
    ) -> BlockchainTransaction {
        let currency = payment
            .blockchain_currency
            .clone()
            .unwrap_or_else(|| network.native_currency().to_string());
        let attempt = tokio::time::timeout(
            self.settings.settlement_timeout,
            self.rail
                .settle(payment.blockchain_amount, &currency, network, from_address),
        )
        .await;

        let reason = match attempt {
            Ok(Ok(transaction)) => return transaction,
            Ok(Err(err)) => format!("{err:#}"),
            Err(_) => format!(
                "settlement timed out after {}ms",
                self.settings.settlement_timeout.as_millis()
            ),
        };
        warn!("{network} settlement from {from_address} failed: {reason}");

        BlockchainTransaction {
            id: Uuid::new_v4(),
            hash: String::new(),
            network,
            from_address: from_address.to_string(),
            to_address: String::new(),
            amount: payment.blockchain_amount,
            currency,
            gas_fee: Decimal::ZERO,
            block_number: None,
            status: TransactionStatus::Failed,
            failure_reason: Some(reason),
            timestamp: Utc::now(),
        }
    }

    /// Moves a redemption between states with a compare-and-set on its current status.
    ///
    /// Losing the race to the same target state is not an error. The flag is false in that case
    /// and the winner's record is returned.
    async fn transition(
        &self,
        redemption_id: Uuid,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
        reason: Option<&str>,
    ) -> Result<(Redemption, bool), RedemptionError> {
        let changed = self
            .store
            .transition(redemption_id, from, to, reason, Utc::now())
            .await?;

        let Some(redemption) = changed else {
            let latest = self.load(redemption_id).await?;
            if latest.status == to {
                return Ok((latest, false));
            }
            return Err(RedemptionError::InvalidTransition {
                from: latest.status,
                to,
            });
        };

        let kind = match to {
            RedemptionStatus::Approved => DomainEventKind::RedemptionApproved,
            RedemptionStatus::Completed => DomainEventKind::RedemptionCompleted,
            RedemptionStatus::Cancelled => DomainEventKind::RedemptionCancelled,
            RedemptionStatus::Pending => DomainEventKind::RedemptionCreated,
        };
        self.record(
            redemption_id,
            kind,
            json!({ "status": to, "reason": redemption.cancel_reason }),
        )
        .await;
        Ok((redemption, true))
    }

    /// Hands back the stock unit and points of a cancelled redemption.
    ///
    /// Each step is claimed in the store before it runs, so concurrent cancels perform it once. A
    /// step that fails is reopened for the next cancel to retry.
    async fn release(&self, redemption: &Redemption) -> Result<(), RedemptionError> {
        let stock = if redemption.stock_restored {
            Ok(())
        } else {
            self.release_step(redemption, ReleaseStep::Stock).await
        };
        let points = if redemption.points_refunded || redemption.payment.points_used == 0 {
            Ok(())
        } else {
            self.release_step(redemption, ReleaseStep::Points).await
        };
        stock.and(points)
    }

    async fn release_step(
        &self,
        redemption: &Redemption,
        step: ReleaseStep,
    ) -> Result<(), RedemptionError> {
        if !self.store.mark_released(redemption.id, step, true).await? {
            return Ok(());
        }

        let points = redemption.payment.points_used;
        let applied = match step {
            ReleaseStep::Stock => self.catalog.restore_stock(redemption.reward_id).await,
            ReleaseStep::Points => self.points.credit(redemption.user_id, points).await,
        };
        if let Err(err) = applied {
            error!(
                "{} failed for cancelled redemption {}: {err:#}",
                step.as_str(),
                redemption.id
            );
            if let Err(reopen) = self.store.mark_released(redemption.id, step, false).await {
                error!(
                    "failed to reopen {} for redemption {}: {reopen:#}",
                    step.as_str(),
                    redemption.id
                );
            }
            return Err(err.into());
        }

        let (kind, payload) = match step {
            ReleaseStep::Stock => (
                DomainEventKind::StockRestored,
                json!({ "reward_id": redemption.reward_id }),
            ),
            ReleaseStep::Points => (
                DomainEventKind::PointsRefunded,
                json!({ "user_id": redemption.user_id, "points": points }),
            ),
        };
        self.record(redemption.id, kind, payload).await;
        Ok(())
    }

    /// Undoes a partial commit. Failures are logged since the original error is what surfaces.
    async fn compensate(&self, reward: &Reward, user_id: Uuid, points: u64) {
        if let Err(err) = self.catalog.restore_stock(reward.id).await {
            error!("failed to restore stock for reward {}: {err:#}", reward.id);
        }
        if points > 0 {
            if let Err(err) = self.points.credit(user_id, points).await {
                error!("failed to refund {points} points to user {user_id}: {err:#}");
            }
        }
    }

    fn replay(
        &self,
        stored: Redemption,
        key: &str,
        fingerprint: &str,
    ) -> Result<RedeemOutcome, RedemptionError> {
        if stored.request_fingerprint.as_deref() != Some(fingerprint) {
            return Err(RedemptionError::IdempotencyKeyReused(key.to_string()));
        }
        info!("replaying stored redemption {} for key {key}", stored.id);
        Ok(self.outcome(stored, true))
    }

    /// Handles a settlement that finished after the redemption left `pending`. A failed attempt
    /// moved nothing. A confirmed one is money on chain for a redemption that no longer wants it.
    async fn discard_settlement(
        &self,
        redemption_id: Uuid,
        transaction: &BlockchainTransaction,
    ) -> Result<Redemption, RedemptionError> {
        let latest = self.load(redemption_id).await?;
        if !transaction.is_confirmed() {
            return Ok(latest);
        }

        self.record_orphaned(redemption_id, transaction).await;
        Err(RedemptionError::SettlementOrphaned {
            redemption_id,
            transaction_id: transaction.id,
        })
    }

    async fn record_orphaned(&self, redemption_id: Uuid, tx: &BlockchainTransaction) {
        error!(
            "{} settlement {} of {} {} from {} has no pending redemption ({redemption_id})",
            tx.network, tx.hash, tx.amount, tx.currency, tx.from_address
        );
        self.record(
            redemption_id,
            DomainEventKind::RailSettlementOrphaned,
            json!({
                "transaction_id": tx.id,
                "hash": tx.hash,
                "network": tx.network,
                "amount": tx.amount,
                "currency": tx.currency,
                "from_address": tx.from_address,
            }),
        )
        .await;
    }

    async fn record_settlement(&self, redemption: &Redemption) {
        let Some(tx) = redemption.transaction.as_ref() else {
            return;
        };
        let kind = if tx.is_confirmed() {
            DomainEventKind::RailSettlementConfirmed
        } else {
            DomainEventKind::RailSettlementFailed
        };
        self.record(
            redemption.id,
            kind,
            json!({
                "transaction_id": tx.id,
                "hash": tx.hash,
                "network": tx.network,
                "amount": tx.amount,
                "attempt": redemption.settlement_attempts,
                "reason": tx.failure_reason,
            }),
        )
        .await;
    }

    async fn record(&self, redemption_id: Uuid, kind: DomainEventKind, payload: serde_json::Value) {
        let event = DomainEvent::new(redemption_id, kind, payload);
        if let Err(err) = self.events.append(redemption_id, event).await {
            warn!(
                "failed to record {} for redemption {redemption_id}: {err:#}",
                kind.as_str()
            );
        }
    }

    fn begin_reconcile(&self, redemption_id: Uuid) -> Option<ReconcileGuard<'_>> {
        let mut in_flight = self
            .reconciling
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(redemption_id) {
            return None;
        }
        Some(ReconcileGuard {
            in_flight: &self.reconciling,
            id: redemption_id,
        })
    }

    async fn load(&self, redemption_id: Uuid) -> Result<Redemption, RedemptionError> {
        self.store
            .get(redemption_id)
            .await?
            .ok_or(RedemptionError::RedemptionNotFound(redemption_id))
    }

    fn outcome(&self, redemption: Redemption, replayed: bool) -> RedeemOutcome {
        RedeemOutcome {
            receipt: self.receipts.project(&redemption),
            warnings: redemption.warnings.clone(),
            redemption,
            replayed,
        }
    }
}
