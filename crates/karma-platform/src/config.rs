use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use karma_core::StaticExchangeRates;

const DEFAULT_IDEMPOTENCY_WINDOW_SECS: u64 = 86_400;
const DEFAULT_SETTLEMENT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_SETTLEMENT_ATTEMPTS: u32 = 3;
const DEFAULT_RAIL_LATENCY_MS: u64 = 250;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
const DEFAULT_ADMIN_ACTOR: &str = "admin-console";

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub receipt_secret: String,
    pub idempotency_window: Duration,
    pub settlement_timeout: Duration,
    pub max_settlement_attempts: u32,
    pub rail_latency: Duration,
    pub rail_failure_rate: f64,
    pub reconcile_interval: Duration,
    pub admin_actor_ids: Vec<String>,
    pub rates: StaticExchangeRates,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |name| std::env::var(name).ok())
    }

    pub fn worker_from_env() -> Result<Self> {
        let mut config = Self::from_lookup("", |name| std::env::var(name).ok())?;
        config.http_addr = String::new();
        Ok(config)
    }

    pub fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;
        let receipt_secret = lookup("RECEIPT_SECRET")
            .filter(|secret| !secret.trim().is_empty())
            .context("RECEIPT_SECRET is required")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());

        let rail_failure_rate: f64 = parse_or(&lookup, "RAIL_FAILURE_RATE", 0.0)?;
        if !(0.0..=1.0).contains(&rail_failure_rate) {
            anyhow::bail!("RAIL_FAILURE_RATE must be between 0 and 1, got {rail_failure_rate}");
        }

        let admin_actor_ids = lookup("ADMIN_ACTOR_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_ADMIN_ACTOR.to_string()]);

        let mut rates = StaticExchangeRates::default();
        if let Some(raw) = lookup("NPR_TO_USD") {
            rates.npr_to_usd = raw.trim().parse().context("NPR_TO_USD must be a decimal")?;
        }
        if let Some(raw) = lookup("POINTS_TO_NPR") {
            rates.points_to_npr = raw.trim().parse().context("POINTS_TO_NPR must be a decimal")?;
        }

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            receipt_secret,
            idempotency_window: Duration::from_secs(parse_or(
                &lookup,
                "IDEMPOTENCY_WINDOW_SECS",
                DEFAULT_IDEMPOTENCY_WINDOW_SECS,
            )?),
            settlement_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SETTLEMENT_TIMEOUT_MS",
                DEFAULT_SETTLEMENT_TIMEOUT_MS,
            )?),
            max_settlement_attempts: parse_or(
                &lookup,
                "MAX_SETTLEMENT_ATTEMPTS",
                DEFAULT_MAX_SETTLEMENT_ATTEMPTS,
            )?
            .max(1),
            rail_latency: Duration::from_millis(parse_or(
                &lookup,
                "RAIL_LATENCY_MS",
                DEFAULT_RAIL_LATENCY_MS,
            )?),
            rail_failure_rate,
            reconcile_interval: Duration::from_secs(
                parse_or(&lookup, "RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL_SECS)?
                    .max(1),
            ),
            admin_actor_ids,
            rates,
        })
    }

    pub fn is_admin(&self, actor_id: &str) -> bool {
        let actor_id = actor_id.trim();
        self.admin_actor_ids.iter().any(|admin| admin == actor_id)
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
