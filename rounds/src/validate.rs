//! Determines whether a proposed position set is valid under a round's
//! constraints.
//
//  This module is deliberately pure: no async, no IO.

use std::fmt;

use miner::types::Constraints;
use pool::types::Position;

/// Why a miner's strategy was disqualified for the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    EmptyTickRange,
    TickWidth,
    TooManyRebalances,
    InsufficientInventory,
    /// Final inventory loss beyond the round's `max_il`; assessed by the
    /// scorer once the portfolio settles.
    MaxIlExceeded,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::EmptyTickRange => "empty_tick_range",
            Violation::TickWidth => "tick_width",
            Violation::TooManyRebalances => "too_many_rebalances",
            Violation::InsufficientInventory => "insufficient_inventory",
            Violation::MaxIlExceeded => "max_il_exceeded",
        };
        f.write_str(s)
    }
}

/// Check a desired position set against the round's constraints.
///
/// Inventory sufficiency is not checked here; the simulator enforces it
/// when the rebalance is applied.
pub fn check_positions(positions: &[Position], constraints: &Constraints) -> Result<(), Violation> {
    for p in positions {
        if p.tick_upper <= p.tick_lower {
            return Err(Violation::EmptyTickRange);
        }
        if p.tick_width() < constraints.min_tick_width {
            return Err(Violation::TickWidth);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(min_tick_width: i32) -> Constraints {
        Constraints { max_il: 0.5, min_tick_width, max_rebalances: 4 }
    }

    fn pos(tick_lower: i32, tick_upper: i32) -> Position {
        Position { tick_lower, tick_upper, amount0: 100, amount1: 100 }
    }

    #[test]
    fn wide_enough_positions_pass() {
        assert_eq!(check_positions(&[pos(-50, 50), pos(0, 10)], &constraints(10)), Ok(()));
    }

    #[test]
    fn narrow_position_fails() {
        assert_eq!(
            check_positions(&[pos(-50, 50), pos(0, 9)], &constraints(10)),
            Err(Violation::TickWidth)
        );
    }

    #[test]
    fn inverted_range_fails_before_width() {
        assert_eq!(check_positions(&[pos(10, 10)], &constraints(1)), Err(Violation::EmptyTickRange));
        assert_eq!(check_positions(&[pos(10, 0)], &constraints(1)), Err(Violation::EmptyTickRange));
    }

    #[test]
    fn empty_set_is_valid() {
        assert_eq!(check_positions(&[], &constraints(10)), Ok(()));
    }
}
