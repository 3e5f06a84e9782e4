use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use pool::types::{Inventory, Position};

/// Registry-assigned miner identity (e.g. a hotkey).
pub type MinerId = String;

/// A reachable miner: identity plus the endpoint queries go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerInfo {
    pub miner_id: MinerId,
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundType {
    Eval,
    Live,
}

impl fmt::Display for RoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundType::Eval => "eval",
            RoundType::Live => "live",
        };
        f.write_str(s)
    }
}

impl FromStr for RoundType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eval" => Ok(RoundType::Eval),
            "live" => Ok(RoundType::Live),
            other => Err(anyhow::anyhow!("Invalid RoundType value: {}", other)),
        }
    }
}

/// Strategy validity limits. Violating strategies score 0 for the round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum tolerated inventory loss as a fraction in [0, 1].
    pub max_il: f64,
    /// Minimum `tick_upper - tick_lower` for any position.
    pub min_tick_width: i32,
    /// Maximum rebalances per round.
    pub max_rebalances: u32,
}

/// Checkpoint query sent to every active miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceQuery {
    pub job_id: String,
    pub vault_address: String,
    pub pair_address: String,
    pub chain_id: u64,
    pub round_id: String,
    pub round_type: RoundType,
    pub block_number: u64,
    pub current_price: f64,
    pub current_positions: Vec<Position>,
    pub inventory_remaining: Inventory,
    pub rebalances_so_far: u32,
    pub constraints: Constraints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub model_info: Option<String>,
}

/// Miner's answer to one checkpoint query.
///
/// `accepted = false` opts the miner out of the entire round; it will not be
/// queried again. Otherwise `desired_positions` is the complete target set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceResponse {
    pub accepted: bool,
    #[serde(default)]
    pub refusal_reason: Option<String>,
    #[serde(default)]
    pub desired_positions: Vec<Position>,
    #[serde(default)]
    pub miner_metadata: MinerMetadata,
}

impl RebalanceResponse {
    pub fn refusal(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            refusal_reason: Some(reason.into()),
            desired_positions: Vec::new(),
            miner_metadata: MinerMetadata::default(),
        }
    }

    pub fn rebalance(desired_positions: Vec<Position>) -> Self {
        Self {
            accepted: true,
            refusal_reason: None,
            desired_positions,
            miner_metadata: MinerMetadata::default(),
        }
    }

    /// Whether the response asks for exactly the positions already held
    /// (set equality on `(tick_lower, tick_upper, amount0, amount1)`).
    pub fn is_noop(&self, current: &[Position]) -> bool {
        if self.desired_positions.len() != current.len() {
            return false;
        }
        let mut desired = self.desired_positions.clone();
        let mut held = current.to_vec();
        desired.sort();
        held.sort();
        desired == held
    }
}
