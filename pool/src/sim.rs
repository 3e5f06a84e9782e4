//! Forward pool simulator.
//!
//! Replays an ordered pool-event stream against one pool and a set of
//! tracked (virtual) owner portfolios:
//!   • swaps move price/tick and credit fees to in-range positions
//!   • mint/burn events maintain the pool-side liquidity map
//!   • rebalances close and reopen an owner's positions at the current price
//!
//! Tracked positions are virtual: they earn a pro-rata share of swap fees
//! but do not alter pool state. The simulator is deterministic: identical
//! event streams and rebalance sequences produce identical portfolios.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::math;
use crate::types::{Inventory, PoolEvent, PoolEventKind, PoolState, Position};

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("insufficient inventory: requested {need0}/{need1}, holding {have0}/{have1}")]
    InsufficientInventory { need0: u64, need1: u64, have0: u64, have1: u64 },

    #[error("invalid position: tick range [{tick_lower}, {tick_upper}) is empty")]
    InvalidPosition { tick_lower: i32, tick_upper: i32 },

    #[error("unknown owner {0}")]
    UnknownOwner(String),
}

/// A position held by an owner, with its liquidity fixed at open time.
#[derive(Debug, Clone)]
struct TrackedPosition {
    spec: Position,
    liquidity: f64,
}

#[derive(Debug, Clone, Default)]
struct OwnerBook {
    positions: Vec<TrackedPosition>,
    inventory: Inventory,
    fees0: f64,
    fees1: f64,
}

/// Snapshot of one owner's holdings inside the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub positions: Vec<Position>,
    pub inventory: Inventory,
    pub fees_accrued: (f64, f64),
}

pub struct PoolSimulator {
    state: PoolState,
    /// BTreeMap so fee crediting iterates owners in a stable order.
    owners: BTreeMap<String, OwnerBook>,
    /// Net liquidity change at each tick boundary, fed by mint/burn events.
    /// Prefix sum up to a tick gives the pool-side active liquidity there.
    liquidity_net: BTreeMap<i32, i128>,
    /// Index of the next unapplied event in the round's shared stream.
    cursor: usize,
}

impl PoolSimulator {
    pub fn new(state: PoolState) -> Self {
        Self {
            state,
            owners: BTreeMap::new(),
            liquidity_net: BTreeMap::new(),
            cursor: 0,
        }
    }

    /// Register an owner with existing holdings. Initial positions are
    /// assumed already deployed; their liquidity is fixed at the current
    /// price and their amounts are not drawn from `inventory`.
    pub fn add_owner(&mut self, owner: &str, inventory: Inventory, positions: &[Position]) {
        let price = self.price();
        let tracked = positions
            .iter()
            .map(|p| TrackedPosition {
                spec: *p,
                liquidity: math::liquidity_for_amounts(
                    p.amount0,
                    p.amount1,
                    p.tick_lower,
                    p.tick_upper,
                    price,
                ),
            })
            .collect();

        self.owners.insert(
            owner.to_string(),
            OwnerBook { positions: tracked, inventory, fees0: 0.0, fees1: 0.0 },
        );
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn price(&self) -> f64 {
        self.state.sqrt_price * self.state.sqrt_price
    }

    /// Apply all events up to and including `block`.
    ///
    /// `events` must be the same ordered slice on every call for this
    /// simulator; a cursor tracks how far it has been consumed.
    pub fn advance_to(&mut self, block: u64, events: &[PoolEvent]) {
        while self.cursor < events.len() {
            let ev = &events[self.cursor];
            if ev.block_number > block {
                break;
            }
            self.apply_event(ev);
            self.cursor += 1;
        }
        if block > self.state.block {
            self.state.block = block;
        }
    }

    fn apply_event(&mut self, event: &PoolEvent) {
        match event.kind {
            PoolEventKind::Swap { amount0_delta, amount1_delta, sqrt_price_x96, new_tick } => {
                // v3 charges the fee on the input side
                let fee_rate = self.state.fee_tier as f64 / 1e6;
                let fee0 = if amount0_delta > 0 { amount0_delta as f64 * fee_rate } else { 0.0 };
                let fee1 = if amount1_delta > 0 { amount1_delta as f64 * fee_rate } else { 0.0 };
                if fee0 > 0.0 || fee1 > 0.0 {
                    self.credit_fees(fee0, fee1);
                }

                self.state.sqrt_price = math::sqrt_price_of_x96(sqrt_price_x96);
                self.state.current_tick = new_tick;
                self.state.block = event.block_number;
            }
            PoolEventKind::Mint { tick_lower, tick_upper, liquidity } => {
                *self.liquidity_net.entry(tick_lower).or_insert(0) += liquidity as i128;
                *self.liquidity_net.entry(tick_upper).or_insert(0) -= liquidity as i128;
            }
            PoolEventKind::Burn { tick_lower, tick_upper, liquidity } => {
                *self.liquidity_net.entry(tick_lower).or_insert(0) -= liquidity as i128;
                *self.liquidity_net.entry(tick_upper).or_insert(0) += liquidity as i128;
            }
            // fee withdrawal, no effect on price or liquidity
            PoolEventKind::Collect { .. } => {}
        }
    }

    /// Distribute a swap's fees across positions in range at the pre-swap
    /// tick, weighted by each position's share of active liquidity.
    fn credit_fees(&mut self, fee0: f64, fee1: f64) {
        let tick = self.state.current_tick;
        let pool_liquidity = self.pool_liquidity_at(tick);

        let tracked_total: f64 = self
            .owners
            .values()
            .flat_map(|book| book.positions.iter())
            .filter(|p| p.spec.tick_lower <= tick && tick < p.spec.tick_upper)
            .map(|p| p.liquidity)
            .sum();

        if tracked_total <= 0.0 {
            return;
        }
        let total = pool_liquidity + tracked_total;

        for book in self.owners.values_mut() {
            let share: f64 = book
                .positions
                .iter()
                .filter(|p| p.spec.tick_lower <= tick && tick < p.spec.tick_upper)
                .map(|p| p.liquidity / total)
                .sum();
            if share > 0.0 {
                book.fees0 += fee0 * share;
                book.fees1 += fee1 * share;
            }
        }
    }

    /// Pool-side active liquidity at `tick`, relative to the replayed
    /// window (the baseline before the window is unobserved).
    fn pool_liquidity_at(&self, tick: i32) -> f64 {
        let net: i128 = self
            .liquidity_net
            .range(..=tick)
            .map(|(_, delta)| *delta)
            .sum();
        net.max(0) as f64
    }

    /// Close all of `owner`'s positions at the current price and open
    /// `new_positions` from the freed inventory.
    ///
    /// Atomic: validation happens before any mutation, so a failed call
    /// leaves the portfolio untouched. Accrued fees are unaffected.
    pub fn apply_rebalance(
        &mut self,
        owner: &str,
        new_positions: &[Position],
    ) -> Result<(), SimError> {
        for p in new_positions {
            if p.tick_upper <= p.tick_lower {
                return Err(SimError::InvalidPosition {
                    tick_lower: p.tick_lower,
                    tick_upper: p.tick_upper,
                });
            }
        }

        let price = self.price();
        let book = self
            .owners
            .get_mut(owner)
            .ok_or_else(|| SimError::UnknownOwner(owner.to_string()))?;

        // amounts freed by closing everything currently open
        let mut avail0 = book.inventory.amount0;
        let mut avail1 = book.inventory.amount1;
        for t in &book.positions {
            let (a0, a1) =
                math::amounts_for_liquidity(t.liquidity, t.spec.tick_lower, t.spec.tick_upper, price);
            avail0 += a0;
            avail1 += a1;
        }

        // u128 sums: requested amounts are miner-controlled and must not wrap
        let need0: u128 = new_positions.iter().map(|p| u128::from(p.amount0)).sum();
        let need1: u128 = new_positions.iter().map(|p| u128::from(p.amount1)).sum();
        if need0 > u128::from(avail0) || need1 > u128::from(avail1) {
            return Err(SimError::InsufficientInventory {
                need0: need0.try_into().unwrap_or(u64::MAX),
                need1: need1.try_into().unwrap_or(u64::MAX),
                have0: avail0,
                have1: avail1,
            });
        }

        let mut rem0 = avail0;
        let mut rem1 = avail1;
        let mut tracked = Vec::with_capacity(new_positions.len());
        for p in new_positions {
            let l = math::liquidity_for_amounts(p.amount0, p.amount1, p.tick_lower, p.tick_upper, price);
            let (c0, c1) = math::amounts_for_liquidity(l, p.tick_lower, p.tick_upper, price);
            // only the amounts the liquidity actually represents are locked;
            // the binding side consumes its full request, the rest returns
            let c0 = c0.min(p.amount0);
            let c1 = c1.min(p.amount1);
            rem0 -= c0;
            rem1 -= c1;
            tracked.push(TrackedPosition { spec: *p, liquidity: l });
        }

        book.inventory = Inventory { amount0: rem0, amount1: rem1 };
        book.positions = tracked;
        Ok(())
    }

    /// Liquidate all of `owner`'s positions into inventory at the current price.
    pub fn close_all(&mut self, owner: &str) -> Result<(), SimError> {
        self.apply_rebalance(owner, &[])
    }

    pub fn portfolio_of(&self, owner: &str) -> Option<Portfolio> {
        self.owners.get(owner).map(|book| Portfolio {
            positions: book.positions.iter().map(|t| t.spec).collect(),
            inventory: book.inventory,
            fees_accrued: (book.fees0, book.fees1),
        })
    }

    /// Total value of `owner`'s holdings in token1 terms at the current
    /// price: open positions, inventory, and accrued fees.
    pub fn portfolio_value(&self, owner: &str) -> Option<f64> {
        let price = self.price();
        self.owners.get(owner).map(|book| {
            let open: f64 = book
                .positions
                .iter()
                .map(|t| math::liquidity_value(t.liquidity, t.spec.tick_lower, t.spec.tick_upper, price))
                .sum();
            open + book.inventory.amount0 as f64 * price
                + book.inventory.amount1 as f64
                + book.fees0 * price
                + book.fees1
        })
    }
}
