//! Read-only access to historical pool events.
//!
//! The coordinator replays swap/mint/burn/collect streams against the
//! forward simulator; this crate owns the query contract and two sources:
//! a SQLite-backed store fed by the ingestion pipeline, and an in-memory
//! source for tests and dry runs.

pub mod memory_source;
pub mod sqlite_source;

use async_trait::async_trait;
use thiserror::Error;

use pool::types::PoolEvent;

pub use memory_source::MemoryEventsSource;
pub use sqlite_source::SqliteEventsSource;

#[derive(Debug, Error)]
pub enum EventsError {
    /// Backend could not be reached; callers may retry with backoff.
    #[error("events backend unavailable: {0}")]
    Unavailable(String),

    /// A stored record failed to decode; not retryable.
    #[error("corrupt event record: {0}")]
    Corrupt(String),
}

/// Last known on-chain price at or before some block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceObservation {
    pub block_number: u64,
    pub sqrt_price_x96: u128,
}

/// Canonical pool key: lowercase hex without the `0x` prefix.
///
/// The backing store keys pools without the prefix; callers may pass either
/// form.
pub fn normalize_pool(address: &str) -> String {
    let trimmed = address.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    stripped.to_ascii_lowercase()
}

#[async_trait]
pub trait EventsSource: Send + Sync {
    /// All events for `pool` in `[from_block, to_block]`, strictly ascending
    /// by `(block_number, log_index)`. An empty range is `Ok(vec![])`.
    async fn events_in(
        &self,
        pool: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, EventsError>;

    /// The last swap-implied price at block ≤ `block`, or `None` when the
    /// pool has no earlier observation.
    async fn price_at_or_before(
        &self,
        pool: &str,
        block: u64,
    ) -> Result<Option<PriceObservation>, EventsError>;

    /// Highest ingested block for `pool`, used to anchor round windows.
    async fn latest_block(&self, pool: &str) -> Result<Option<u64>, EventsError>;
}
