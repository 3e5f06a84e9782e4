//! SqliteEventsSource
//! --------------------
//! SQLite-backed implementation of [`EventsSource`]. The ingestion pipeline
//! appends decoded pool events here; the coordinator only reads. 128-bit
//! wire quantities (deltas, sqrt prices, liquidity) are stored as TEXT
//! because SQLite integers are 64-bit.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use pool::types::{PoolEvent, PoolEventKind};

use super::{normalize_pool, EventsError, EventsSource, PriceObservation};

pub struct SqliteEventsSource {
    pool: SqlitePool,
}

impl SqliteEventsSource {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the events database and ensure the schema exists.
    pub async fn new(url: &str) -> Result<Self, EventsError> {
        let options = url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| EventsError::Unavailable(e.to_string()))?
            .create_if_missing(true);
        // in-memory SQLite is per-connection; a wider pool would hand each
        // query a different empty database
        let mut pool_options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            pool_options = pool_options.max_connections(1);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pool_events (
                pool TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                kind TEXT NOT NULL,

                amount0_delta TEXT,
                amount1_delta TEXT,
                sqrt_price_x96 TEXT,
                new_tick INTEGER,

                tick_lower INTEGER,
                tick_upper INTEGER,
                liquidity TEXT,
                amount0 TEXT,
                amount1 TEXT,

                PRIMARY KEY (pool, block_number, log_index)
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Append one decoded event. Used by the ingestion pipeline and tests;
    /// the coordinator itself never writes.
    pub async fn insert_event(&self, pool_address: &str, event: &PoolEvent) -> Result<(), EventsError> {
        let key = normalize_pool(pool_address);

        let (kind, a0d, a1d, spx96, new_tick, tl, tu, liq, a0, a1) = match &event.kind {
            PoolEventKind::Swap { amount0_delta, amount1_delta, sqrt_price_x96, new_tick } => (
                "swap",
                Some(amount0_delta.to_string()),
                Some(amount1_delta.to_string()),
                Some(sqrt_price_x96.to_string()),
                Some(*new_tick),
                None,
                None,
                None,
                None,
                None,
            ),
            PoolEventKind::Mint { tick_lower, tick_upper, liquidity } => (
                "mint",
                None,
                None,
                None,
                None,
                Some(*tick_lower),
                Some(*tick_upper),
                Some(liquidity.to_string()),
                None,
                None,
            ),
            PoolEventKind::Burn { tick_lower, tick_upper, liquidity } => (
                "burn",
                None,
                None,
                None,
                None,
                Some(*tick_lower),
                Some(*tick_upper),
                Some(liquidity.to_string()),
                None,
                None,
            ),
            PoolEventKind::Collect { tick_lower, tick_upper, amount0, amount1 } => (
                "collect",
                None,
                None,
                None,
                None,
                Some(*tick_lower),
                Some(*tick_upper),
                None,
                Some(amount0.to_string()),
                Some(amount1.to_string()),
            ),
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pool_events (
                pool, block_number, log_index, kind,
                amount0_delta, amount1_delta, sqrt_price_x96, new_tick,
                tick_lower, tick_upper, liquidity, amount0, amount1
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(key)
        .bind(event.block_number as i64)
        .bind(event.log_index as i64)
        .bind(kind)
        .bind(a0d)
        .bind(a1d)
        .bind(spx96)
        .bind(new_tick)
        .bind(tl)
        .bind(tu)
        .bind(liq)
        .bind(a0)
        .bind(a1)
        .execute(&self.pool)
        .await
        .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        Ok(())
    }
}

fn parse_i128(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<i128, EventsError> {
    let raw: Option<String> = row.get(column);
    raw.ok_or_else(|| EventsError::Corrupt(format!("missing column {column}")))?
        .parse::<i128>()
        .map_err(|e| EventsError::Corrupt(format!("bad {column}: {e}")))
}

fn parse_u128(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u128, EventsError> {
    let raw: Option<String> = row.get(column);
    raw.ok_or_else(|| EventsError::Corrupt(format!("missing column {column}")))?
        .parse::<u128>()
        .map_err(|e| EventsError::Corrupt(format!("bad {column}: {e}")))
}

fn parse_tick(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<i32, EventsError> {
    let raw: Option<i64> = row.get(column);
    raw.map(|v| v as i32)
        .ok_or_else(|| EventsError::Corrupt(format!("missing column {column}")))
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<PoolEvent, EventsError> {
    let block_number = row.get::<i64, _>("block_number") as u64;
    let log_index = row.get::<i64, _>("log_index") as u32;
    let kind_str: String = row.get("kind");

    let kind = match kind_str.as_str() {
        "swap" => PoolEventKind::Swap {
            amount0_delta: parse_i128(row, "amount0_delta")?,
            amount1_delta: parse_i128(row, "amount1_delta")?,
            sqrt_price_x96: parse_u128(row, "sqrt_price_x96")?,
            new_tick: parse_tick(row, "new_tick")?,
        },
        "mint" => PoolEventKind::Mint {
            tick_lower: parse_tick(row, "tick_lower")?,
            tick_upper: parse_tick(row, "tick_upper")?,
            liquidity: parse_u128(row, "liquidity")?,
        },
        "burn" => PoolEventKind::Burn {
            tick_lower: parse_tick(row, "tick_lower")?,
            tick_upper: parse_tick(row, "tick_upper")?,
            liquidity: parse_u128(row, "liquidity")?,
        },
        "collect" => PoolEventKind::Collect {
            tick_lower: parse_tick(row, "tick_lower")?,
            tick_upper: parse_tick(row, "tick_upper")?,
            amount0: parse_u128(row, "amount0")?,
            amount1: parse_u128(row, "amount1")?,
        },
        other => return Err(EventsError::Corrupt(format!("unknown event kind '{other}'"))),
    };

    Ok(PoolEvent { block_number, log_index, kind })
}

#[async_trait]
impl EventsSource for SqliteEventsSource {
    async fn events_in(
        &self,
        pool: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, EventsError> {
        let key = normalize_pool(pool);

        let rows = sqlx::query(
            r#"
            SELECT * FROM pool_events
            WHERE pool = ? AND block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC, log_index ASC
        "#,
        )
        .bind(key)
        .bind(from_block as i64)
        .bind(to_block as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }

    async fn price_at_or_before(
        &self,
        pool: &str,
        block: u64,
    ) -> Result<Option<PriceObservation>, EventsError> {
        let key = normalize_pool(pool);

        let row = sqlx::query(
            r#"
            SELECT block_number, sqrt_price_x96 FROM pool_events
            WHERE pool = ? AND kind = 'swap' AND block_number <= ?
            ORDER BY block_number DESC, log_index DESC
            LIMIT 1
        "#,
        )
        .bind(key)
        .bind(block as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(PriceObservation {
                block_number: row.get::<i64, _>("block_number") as u64,
                sqrt_price_x96: parse_u128(&row, "sqrt_price_x96")?,
            })),
        }
    }

    async fn latest_block(&self, pool: &str) -> Result<Option<u64>, EventsError> {
        let key = normalize_pool(pool);

        let row = sqlx::query("SELECT MAX(block_number) AS latest FROM pool_events WHERE pool = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EventsError::Unavailable(e.to_string()))?;

        let latest: Option<i64> = row.get("latest");
        Ok(latest.map(|b| b as u64))
    }
}
