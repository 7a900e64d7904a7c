//! Postgres-backed tick store
//!
//! Samples are buffered in memory and written with one multi-row insert per
//! flush. A flush happens automatically once `batch_size` samples are
//! pending, and is forced by the tracker before every snapshot and at
//! session end.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::common::errors::Result;
use crate::common::traits::TickStore;
use crate::common::types::{IndexName, PriceSample, SessionRecord};
use crate::config::types::DatabaseConfig;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS straddle_sessions (
        id BIGSERIAL PRIMARY KEY,
        index_name VARCHAR(20) NOT NULL,
        expiry_date DATE NOT NULL,
        atm_strike NUMERIC(10, 2) NOT NULL,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        ended_at TIMESTAMPTZ
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS straddle_sessions_one_open
        ON straddle_sessions (index_name) WHERE ended_at IS NULL"#,
    r#"CREATE TABLE IF NOT EXISTS straddle_ticks (
        id BIGSERIAL PRIMARY KEY,
        session_id BIGINT NOT NULL REFERENCES straddle_sessions (id) ON DELETE CASCADE,
        ts TIMESTAMPTZ NOT NULL,
        call_price NUMERIC(10, 2) NOT NULL,
        put_price NUMERIC(10, 2) NOT NULL,
        straddle_price NUMERIC(10, 2) NOT NULL,
        spot_price NUMERIC(10, 2)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS straddle_ticks_session_ts
        ON straddle_ticks (session_id, ts)"#,
    r#"CREATE TABLE IF NOT EXISTS straddle_charts (
        id BIGSERIAL PRIMARY KEY,
        session_id BIGINT NOT NULL REFERENCES straddle_sessions (id) ON DELETE CASCADE,
        chart_path VARCHAR(500),
        generated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
];

/// Unwritten ticks kept by default when flushes keep failing
pub const DEFAULT_MAX_PENDING: usize = 10_000;

pub struct PgTickStore {
    pool: PgPool,
    batch_size: usize,
    max_pending: usize,
    pending: Mutex<Vec<(i64, PriceSample)>>,
}

impl PgTickStore {
    /// Connect a pool using the database settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to Postgres");
        Ok(Self::with_pool(pool, config.batch_size)
            .with_max_pending(config.max_buffered_ticks))
    }

    pub fn with_pool(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_pending: DEFAULT_MAX_PENDING,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Cap on ticks retained across failed flushes
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(self.batch_size);
        self
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready");
        Ok(())
    }
}

#[async_trait]
impl TickStore for PgTickStore {
    async fn create_session(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
    ) -> Result<SessionRecord> {
        // Sessions left open by a crashed run would block the unique index.
        let stale = sqlx::query(
            "UPDATE straddle_sessions SET ended_at = now() \
             WHERE index_name = $1 AND ended_at IS NULL",
        )
        .bind(index.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if stale > 0 {
            warn!(index = %index, stale, "Closed sessions left open by an earlier run");
        }

        let (id, started_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO straddle_sessions (index_name, expiry_date, atm_strike) \
             VALUES ($1, $2, $3) RETURNING id, started_at",
        )
        .bind(index.as_str())
        .bind(expiry)
        .bind(strike)
        .fetch_one(&self.pool)
        .await?;

        Ok(SessionRecord {
            id,
            index,
            expiry,
            strike,
            started_at,
            ended_at: None,
        })
    }

    async fn add_tick(&self, session_id: i64, sample: &PriceSample) -> Result<()> {
        let due = {
            let mut pending = self.pending.lock();
            pending.push((session_id, sample.clone()));
            pending.len() >= self.batch_size
        };
        if due {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let rows = std::mem::take(&mut *self.pending.lock());
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO straddle_ticks \
             (session_id, ts, call_price, put_price, straddle_price, spot_price) ",
        );
        builder.push_values(rows.iter(), |mut row, (session_id, sample)| {
            row.push_bind(*session_id)
                .push_bind(sample.timestamp)
                .push_bind(sample.call_price)
                .push_bind(sample.put_price)
                .push_bind(sample.straddle_price)
                .push_bind(sample.reference_price);
        });

        match builder.build().execute(&self.pool).await {
            Ok(_) => {
                debug!(rows = rows.len(), "Flushed samples");
                Ok(())
            }
            Err(e) => {
                let mut pending = self.pending.lock();
                let newer = std::mem::take(&mut *pending);
                let dropped = requeue(&mut *pending, rows, newer, self.max_pending);
                if dropped > 0 {
                    warn!(
                        dropped,
                        kept = pending.len(),
                        "Tick buffer full, dropped oldest unwritten samples"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn update_session_strike(&self, session_id: i64, strike: Decimal) -> Result<()> {
        sqlx::query("UPDATE straddle_sessions SET atm_strike = $1 WHERE id = $2")
            .bind(strike)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_chart_record(&self, session_id: i64, path: &str) -> Result<()> {
        sqlx::query("INSERT INTO straddle_charts (session_id, chart_path) VALUES ($1, $2)")
            .bind(session_id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end_session(&self, session_id: i64) -> Result<()> {
        let flushed = self.flush().await;
        if let Err(e) = &flushed {
            warn!(session_id, "Closing session with unwritten samples: {}", e);
        }
        sqlx::query(
            "UPDATE straddle_sessions SET ended_at = now() \
             WHERE id = $1 AND ended_at IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        info!(session_id, "Session closed");
        flushed
    }
}

/// Put rows from a failed flush back ahead of rows queued since, keeping at
/// most `cap` of the newest. Returns how many were dropped.
fn requeue<T>(pending: &mut Vec<T>, failed: Vec<T>, newer: Vec<T>, cap: usize) -> usize {
    pending.clear();
    pending.extend(failed);
    pending.extend(newer);
    let dropped = pending.len().saturating_sub(cap);
    pending.drain(..dropped);
    dropped
}
