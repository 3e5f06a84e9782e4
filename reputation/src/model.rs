use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use miner::types::{Constraints, MinerId, RoundType};
use pool::types::{Inventory, Position};

pub type JobId = String;
pub type RoundId = uuid::Uuid;

/// Optimization target for a job's scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "PoL")]
    Pol,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pol => f.write_str("PoL"),
        }
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PoL" => Ok(Target::Pol),
            other => Err(anyhow::anyhow!("Invalid Target value: {}", other)),
        }
    }
}

/// One managed vault/pair. Created from configuration; immutable except
/// `active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub pair_address: String,
    pub vault_address: String,
    pub chain_id: u64,
    /// Pool fee in parts-per-million (v3 convention).
    pub fee_tier: u32,
    /// Wall-clock cadence of the job's round loop.
    pub round_duration_secs: u64,
    /// Blocks between rebalance checkpoints within a round.
    pub checkpoint_interval: u64,
    /// Blocks replayed per round; deployment-specific (chain block time),
    /// so configured rather than derived.
    pub round_blocks: u64,
    pub target: Target,
    pub active: bool,
    pub constraints: Constraints,
    /// Benchmark inventory each round starts from.
    pub seed_inventory: Inventory,
}

impl Job {
    pub fn round_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.round_duration_secs)
    }
}

/// One scored forward simulation. Frozen once executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub round_id: RoundId,
    pub job_id: JobId,
    pub round_type: RoundType,
    pub start_block: u64,
    pub end_block: u64,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub constraints: Constraints,
    pub initial_inventory: Inventory,
    pub initial_positions: Vec<Position>,
}

impl Round {
    /// Total starting holdings, inventory plus deployed positions.
    pub fn initial_amounts(&self) -> (u64, u64) {
        let mut amount0 = self.initial_inventory.amount0;
        let mut amount1 = self.initial_inventory.amount1;
        for p in &self.initial_positions {
            amount0 += p.amount0;
            amount1 += p.amount1;
        }
        (amount0, amount1)
    }
}

/// One applied rebalance, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceDecision {
    pub block: u64,
    pub positions: Vec<Position>,
}

/// A miner's holdings when its round ended (or froze).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPortfolio {
    pub positions: Vec<Position>,
    pub inventory: Inventory,
    pub fees_accrued: (f64, f64),
    pub value_in_token1: f64,
    pub valued_at_block: u64,
}

/// Per-miner outcome of one round.
///
/// `accepted = false` covers both explicit refusals and miners dropped
/// after repeated transport failures; neither updates scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub round_id: RoundId,
    pub miner_id: MinerId,
    pub accepted: bool,
    /// Whether the miner answered at least one query non-refusing;
    /// drives the participation ledger.
    pub responded: bool,
    pub violation: Option<String>,
    pub final_portfolio: FinalPortfolio,
    pub raw_score: Option<f64>,
    pub normalized_rank: Option<f64>,
    pub decisions: Vec<RebalanceDecision>,
}

/// Per-(miner, job) reputation row, updated in place by the scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerScore {
    pub miner_id: MinerId,
    pub job_id: JobId,
    pub eval_ema: Option<f64>,
    pub live_ema: Option<f64>,
    pub combined: f64,
    pub last_eval_at_ms: Option<u64>,
    pub last_live_at_ms: Option<u64>,
}

/// One score observation to fold into a miner's EMAs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub miner_id: MinerId,
    pub score: f64,
    pub round_type: RoundType,
}
