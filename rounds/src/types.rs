//! Shared types used by the round subsystem.

use std::time::Duration;

use thiserror::Error;

use reputation::model::Prediction;

/// Tuning knobs for a single round's execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard deadline for each miner query.
    pub miner_timeout: Duration,

    /// Transport failures in a row before a miner is dropped for the round.
    pub max_consecutive_failures: u32,

    /// Events-source attempts before the round aborts.
    pub events_attempts: u32,

    /// Initial backoff between events-source attempts; doubles per retry.
    pub events_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            miner_timeout: Duration::from_secs(60),
            max_consecutive_failures: 3,
            events_attempts: 3,
            events_backoff: Duration::from_millis(500),
        }
    }
}

/// Reasons a round aborts without producing predictions. Aborted rounds are
/// never archived and never touch reputation.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("events source unavailable after {attempts} attempts: {last}")]
    EventsUnavailable { attempts: u32, last: String },

    #[error("no price observation at or before block {block}")]
    NoPriceData { block: u64 },
}

/// A completed round: one prediction per miner (unscored), plus the prices
/// the scorer needs.
#[derive(Debug)]
pub struct RoundOutcome {
    pub predictions: Vec<Prediction>,
    pub initial_price: f64,
    pub final_price: f64,
}
