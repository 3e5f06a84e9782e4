//! Round execution: checkpointed forward simulation with parallel miner
//! fan-out, followed by constraint-aware PoL scoring.

pub mod executor;
pub mod scoring;
pub mod types;
pub mod validate;

pub use executor::RoundExecutor;
pub use scoring::{RankOutcome, ScorePolicy};
pub use types::{ExecutorConfig, RoundError, RoundOutcome};
