use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karma_core::{
    BlockchainNetwork, BlockchainTransaction, DeliveryInfo, DomainEvent, DomainEventKind,
    EventEnvelope, EventStore, InsertOutcome, PaymentBreakdown, Redemption, RedemptionStatus,
    RedemptionStore, RedemptionWarning, ReleaseStep, Reward, Wallet,
};
use karma_tools::{CatalogTool, PointsTool};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::warn;
use uuid::Uuid;

const REDEMPTION_COLUMNS: &str = concat!(
    "id, user_id, reward_id, reward_title, status, payment, settlement, delivery, ",
    "idempotency_key, request_fingerprint, warnings, settlement_attempts, cancel_reason, ",
    "stock_restored, points_refunded, ",
    "created_at, updated_at, approved_at, completed_at, cancelled_at",
);

fn points_to_sql(points: u64) -> Result<i64> {
    i64::try_from(points).context("points amount exceeds the storable range")
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn reward_from_row(row: &PgRow) -> Result<Reward> {
    let quantity: i32 = row.try_get("quantity_available")?;
    let price_points: Option<i64> = row.try_get("price_points")?;
    let category: String = row.try_get("category")?;

    Ok(Reward {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        price_npr: row.try_get("price_npr")?,
        price_points: price_points
            .map(u64::try_from)
            .transpose()
            .context("negative points price")?,
        quantity_available: u32::try_from(quantity).context("negative stock")?,
        category: category.parse()?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl CatalogTool for PgCatalog {
    async fn get_reward(&self, reward_id: Uuid) -> Result<Option<Reward>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, price_npr, price_points, quantity_available, category, active
            FROM rewards
            WHERE id = $1
            "#,
        )
        .bind(reward_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reward_from_row).transpose()
    }

    async fn decrement_stock(&self, reward_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rewards
            SET quantity_available = quantity_available - 1, updated_at = $2
            WHERE id = $1 AND active AND quantity_available > 0
            "#,
        )
        .bind(reward_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn restore_stock(&self, reward_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rewards
            SET quantity_available = quantity_available + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(reward_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("restore_stock for unknown reward {reward_id}");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgPointsLedger {
    pool: PgPool,
}

impl PgPointsLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointsTool for PgPointsLedger {
    async fn balance(&self, user_id: Uuid) -> Result<u64> {
        let balance: Option<i64> =
            sqlx::query("SELECT balance FROM points_accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get("balance"))
                .transpose()?;

        Ok(u64::try_from(balance.unwrap_or_default()).context("negative points balance")?)
    }

    async fn debit(&self, user_id: Uuid, amount: u64) -> Result<bool> {
        if amount == 0 {
            return Ok(true);
        }

        let result = sqlx::query(
            r#"
            UPDATE points_accounts
            SET balance = balance - $2, updated_at = $3
            WHERE user_id = $1 AND balance >= $2
            "#,
        )
        .bind(user_id)
        .bind(points_to_sql(amount)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn credit(&self, user_id: Uuid, amount: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO points_accounts (user_id, balance, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET
                balance = points_accounts.balance + EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(points_to_sql(amount)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn linked_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            r#"
            SELECT wallet_address, wallet_network, wallet_currency, wallet_balance
            FROM points_accounts
            WHERE user_id = $1 AND wallet_address IS NOT NULL AND wallet_network IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let network: BlockchainNetwork = row.try_get::<String, _>("wallet_network")?.parse()?;
        let currency: Option<String> = row.try_get("wallet_currency")?;

        Ok(Some(Wallet {
            address: row.try_get("wallet_address")?,
            currency: currency.unwrap_or_else(|| network.native_currency().to_string()),
            balance: row.try_get::<Decimal, _>("wallet_balance")?,
            network,
        }))
    }
}

#[derive(Clone)]
pub struct PgRedemptionStore {
    pool: PgPool,
}

impl PgRedemptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn redemption_from_row(row: &PgRow) -> Result<Redemption> {
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("settlement_attempts")?;
    let payment: Json<PaymentBreakdown> = row.try_get("payment")?;
    let settlement: Option<Json<BlockchainTransaction>> = row.try_get("settlement")?;
    let delivery: Option<Json<DeliveryInfo>> = row.try_get("delivery")?;
    let warnings: Json<Vec<RedemptionWarning>> = row.try_get("warnings")?;

    Ok(Redemption {
        id: row.try_get("id")?,
        reward_id: row.try_get("reward_id")?,
        reward_title: row.try_get("reward_title")?,
        user_id: row.try_get("user_id")?,
        payment: payment.0,
        transaction: settlement.map(|value| value.0),
        delivery: delivery.map(|value| value.0),
        status: status.parse()?,
        idempotency_key: row.try_get("idempotency_key")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        warnings: warnings.0,
        settlement_attempts: u32::try_from(attempts).context("negative settlement attempts")?,
        cancel_reason: row.try_get("cancel_reason")?,
        stock_restored: row.try_get("stock_restored")?,
        points_refunded: row.try_get("points_refunded")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        approved_at: row.try_get("approved_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn attempts_to_sql(attempts: u32) -> Result<i32> {
    i32::try_from(attempts).context("settlement attempts exceed the storable range")
}

#[async_trait]
impl RedemptionStore for PgRedemptionStore {
    async fn insert(
        &self,
        redemption: &Redemption,
        key_since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = redemption.idempotency_key.as_deref() {
            sqlx::query(
                r#"
                UPDATE redemptions SET idempotency_key = NULL
                WHERE user_id = $1 AND idempotency_key = $2 AND created_at < $3
                "#,
            )
            .bind(redemption.user_id)
            .bind(key)
            .bind(key_since)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO redemptions (
                id, user_id, reward_id, reward_title, status, payment, settlement, delivery,
                idempotency_key, request_fingerprint, warnings, settlement_attempts, cancel_reason,
                stock_restored, points_refunded,
                created_at, updated_at, approved_at, completed_at, cancelled_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (user_id, idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            "#,
        )
        .bind(redemption.id)
        .bind(redemption.user_id)
        .bind(redemption.reward_id)
        .bind(&redemption.reward_title)
        .bind(redemption.status.as_str())
        .bind(Json(&redemption.payment))
        .bind(redemption.transaction.as_ref().map(Json))
        .bind(redemption.delivery.as_ref().map(Json))
        .bind(redemption.idempotency_key.as_deref())
        .bind(redemption.request_fingerprint.as_deref())
        .bind(Json(&redemption.warnings))
        .bind(attempts_to_sql(redemption.settlement_attempts)?)
        .bind(redemption.cancel_reason.as_deref())
        .bind(redemption.stock_restored)
        .bind(redemption.points_refunded)
        .bind(redemption.created_at)
        .bind(redemption.updated_at)
        .bind(redemption.approved_at)
        .bind(redemption.completed_at)
        .bind(redemption.cancelled_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert redemption {}", redemption.id))?;

        if result.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(InsertOutcome::Inserted);
        }

        let row = sqlx::query(&format!(
            "SELECT {REDEMPTION_COLUMNS} FROM redemptions \
             WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(redemption.user_id)
        .bind(redemption.idempotency_key.as_deref())
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| {
            format!("idempotency conflict for redemption {} without a holder", redemption.id)
        })?;
        tx.commit().await?;

        Ok(InsertOutcome::KeyHeld(redemption_from_row(&row)?))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Redemption>> {
        let row = sqlx::query(&format!(
            "SELECT {REDEMPTION_COLUMNS} FROM redemptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(redemption_from_row).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Redemption>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {REDEMPTION_COLUMNS} FROM redemptions
            WHERE user_id = $1 AND idempotency_key = $2 AND created_at >= $3
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(key)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(redemption_from_row).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<Redemption>> {
        let from: Vec<String> = from.iter().map(|status| status.as_str().to_string()).collect();
        let row = sqlx::query(&format!(
            r#"
            UPDATE redemptions
            SET status = $3,
                updated_at = $4,
                approved_at = CASE WHEN $3 = 'approved' THEN $4 ELSE approved_at END,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $4 ELSE cancelled_at END,
                cancel_reason = CASE WHEN $3 = 'cancelled' THEN $5 ELSE cancel_reason END
            WHERE id = $1 AND status = ANY($2)
            RETURNING {REDEMPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from)
        .bind(to.as_str())
        .bind(at)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(redemption_from_row).transpose()
    }

    async fn save_settlement(&self, redemption: &Redemption) -> Result<Option<Redemption>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE redemptions
            SET settlement = $2, settlement_attempts = $3, warnings = $4, updated_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {REDEMPTION_COLUMNS}
            "#
        ))
        .bind(redemption.id)
        .bind(redemption.transaction.as_ref().map(Json))
        .bind(attempts_to_sql(redemption.settlement_attempts)?)
        .bind(Json(&redemption.warnings))
        .bind(redemption.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(redemption_from_row).transpose()
    }

    async fn mark_released(&self, id: Uuid, step: ReleaseStep, done: bool) -> Result<bool> {
        let column = step.as_str();
        let result = sqlx::query(&format!(
            r#"
            UPDATE redemptions
            SET {column} = $2
            WHERE id = $1 AND status = 'cancelled' AND {column} <> $2
            "#
        ))
        .bind(id)
        .bind(done)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_awaiting_settlement(&self, limit: usize) -> Result<Vec<Redemption>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REDEMPTION_COLUMNS} FROM redemptions
            WHERE status = 'pending' AND settlement ->> 'status' = 'failed'
            ORDER BY created_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(redemption_from_row).collect()
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn envelope_from_row(row: &PgRow) -> Result<EventEnvelope> {
    let kind: String = row.try_get("kind")?;
    let payload: Json<serde_json::Value> = row.try_get("payload")?;

    Ok(EventEnvelope {
        sequence: row.try_get("sequence")?,
        stream_id: row.try_get("stream_id")?,
        event: DomainEvent {
            id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            kind: kind.parse::<DomainEventKind>()?,
            occurred_at: row.try_get("occurred_at")?,
            payload: payload.0,
        },
        stored_at: row.try_get("stored_at")?,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> Result<EventEnvelope> {
        let row = sqlx::query(
            r#"
            INSERT INTO domain_events
                (stream_id, event_id, aggregate_id, kind, occurred_at, payload, stored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                sequence, stream_id, event_id, aggregate_id, kind, occurred_at, payload, stored_at
            "#,
        )
        .bind(stream_id)
        .bind(event.id)
        .bind(event.aggregate_id)
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .bind(Json(&event.payload))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        envelope_from_row(&row)
    }

    async fn stream(&self, stream_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT
                sequence, stream_id, event_id, aggregate_id, kind, occurred_at, payload, stored_at
            FROM domain_events
            WHERE stream_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(envelope_from_row).collect()
    }
}
