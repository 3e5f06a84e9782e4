use serde::{Deserialize, Serialize};

/// A concentrated-liquidity range with the token amounts deposited into it.
///
/// `amount0`/`amount1` are the deposit amounts in token units; the derived
/// liquidity depends on the pool price and is computed by [`crate::math`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0: u64,
    pub amount1: u64,
}

impl Position {
    pub fn tick_width(&self) -> i32 {
        self.tick_upper - self.tick_lower
    }
}

/// Uncommitted token holdings, in token units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub amount0: u64,
    pub amount1: u64,
}

impl Inventory {
    pub fn new(amount0: u64, amount1: u64) -> Self {
        Self { amount0, amount1 }
    }
}

/// Pool-global state at a block.
///
/// `sqrt_price` is sqrt(token1/token0); `current_tick` must stay consistent
/// with it. `fee_tier` is in parts-per-million (v3 convention: 3000 = 0.3%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolState {
    pub block: u64,
    pub sqrt_price: f64,
    pub current_tick: i32,
    pub fee_tier: u32,
}

/// One on-chain pool event, ordered by `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub block_number: u64,
    pub log_index: u32,
    pub kind: PoolEventKind,
}

impl PoolEvent {
    /// Stable ordering key within an event stream.
    pub fn ordering_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEventKind {
    /// Deltas are from the pool's perspective: positive flows into the pool.
    Swap {
        amount0_delta: i128,
        amount1_delta: i128,
        sqrt_price_x96: u128,
        new_tick: i32,
    },
    Mint {
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
    },
    Burn {
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
    },
    Collect {
        tick_lower: i32,
        tick_upper: i32,
        amount0: u128,
        amount1: u128,
    },
}
