use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rewards (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        price_npr NUMERIC(18, 2),
        price_points BIGINT,
        quantity_available INTEGER NOT NULL CHECK (quantity_available >= 0),
        category TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS points_accounts (
        user_id UUID PRIMARY KEY,
        balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        wallet_address TEXT,
        wallet_network TEXT,
        wallet_currency TEXT,
        wallet_balance NUMERIC(36, 18) NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS redemptions (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        reward_id UUID NOT NULL,
        reward_title TEXT NOT NULL,
        status TEXT NOT NULL,
        payment JSONB NOT NULL,
        settlement JSONB,
        delivery JSONB,
        idempotency_key TEXT,
        request_fingerprint TEXT,
        warnings JSONB NOT NULL DEFAULT '[]'::jsonb,
        settlement_attempts INTEGER NOT NULL DEFAULT 0,
        cancel_reason TEXT,
        stock_restored BOOLEAN NOT NULL DEFAULT FALSE,
        points_refunded BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        approved_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        cancelled_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS redemptions_idempotency_key_idx
    ON redemptions (user_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL
    "#,
    "CREATE INDEX IF NOT EXISTS redemptions_status_idx ON redemptions (status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS domain_events (
        sequence BIGSERIAL PRIMARY KEY,
        stream_id UUID NOT NULL,
        event_id UUID NOT NULL UNIQUE,
        aggregate_id UUID NOT NULL,
        kind TEXT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        payload JSONB NOT NULL,
        stored_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS domain_events_stream_idx ON domain_events (stream_id, sequence)",
];

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Creates the tables the services rely on. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA.iter().copied() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("failed to apply schema statement: {}", statement.trim()))?;
    }
    info!("database schema ready");
    Ok(())
}
