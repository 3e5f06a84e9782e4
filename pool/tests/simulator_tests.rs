use pool::math;
use pool::sim::{PoolSimulator, SimError};
use pool::types::{Inventory, PoolEvent, PoolEventKind, PoolState, Position};

const X96: f64 = 79228162514264337593543950336.0;
const LP: &str = "miner-a";

fn sqrt_x96_of_price(price: f64) -> u128 {
    (price.sqrt() * X96) as u128
}

fn state_at(price: f64, fee_tier: u32) -> PoolState {
    PoolState {
        block: 0,
        sqrt_price: price.sqrt(),
        current_tick: math::tick_of_price(price),
        fee_tier,
    }
}

fn swap(block: u64, log_index: u32, amount1_in: i128, price_after: f64) -> PoolEvent {
    PoolEvent {
        block_number: block,
        log_index,
        kind: PoolEventKind::Swap {
            amount0_delta: -amount1_in, // shape only; fees come from the input side
            amount1_delta: amount1_in,
            sqrt_price_x96: sqrt_x96_of_price(price_after),
            new_tick: math::tick_of_price(price_after),
        },
    }
}

fn wide_position(amount0: u64, amount1: u64) -> Position {
    Position { tick_lower: -10_000, tick_upper: 10_000, amount0, amount1 }
}

#[test]
fn noop_rebalance_preserves_portfolio() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(1_000, 1_000), &[]);
    sim.apply_rebalance(LP, &[wide_position(1_000, 1_000)]).unwrap();

    let before = sim.portfolio_of(LP).unwrap();
    sim.apply_rebalance(LP, &[wide_position(1_000, 1_000)]).unwrap();
    let after = sim.portfolio_of(LP).unwrap();

    assert_eq!(before.positions, after.positions);
    assert_eq!(before.inventory, after.inventory);
    assert_eq!(before.fees_accrued, after.fees_accrued);
}

#[test]
fn rebalance_round_trip_restores_holdings() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(5_000, 5_000), &[]);

    let original = wide_position(2_000, 2_000);
    sim.apply_rebalance(LP, &[original]).unwrap();

    let narrow = Position { tick_lower: -100, tick_upper: 100, amount0: 1_000, amount1: 1_000 };
    sim.apply_rebalance(LP, &[narrow]).unwrap();
    sim.apply_rebalance(LP, &[original]).unwrap();

    let p = sim.portfolio_of(LP).unwrap();
    assert_eq!(p.positions, vec![original]);
    // price never moved, so total holdings return to the starting amounts
    let value = sim.portfolio_value(LP).unwrap();
    assert!((value - 10_000.0).abs() < 10.0, "value drifted: {value}");
}

#[test]
fn value_is_conserved_across_rebalances() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(10_000, 10_000), &[]);
    let before = sim.portfolio_value(LP).unwrap();

    sim.apply_rebalance(LP, &[wide_position(4_000, 4_000)]).unwrap();
    sim.apply_rebalance(
        LP,
        &[
            Position { tick_lower: -5_000, tick_upper: -10, amount0: 0, amount1: 3_000 },
            Position { tick_lower: 10, tick_upper: 5_000, amount0: 3_000, amount1: 0 },
        ],
    )
    .unwrap();

    let after = sim.portfolio_value(LP).unwrap();
    assert!((before - after).abs() < 10.0, "value not conserved: {before} -> {after}");
}

#[test]
fn overdrawing_inventory_fails_and_leaves_state_intact() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(100, 100), &[]);

    let err = sim.apply_rebalance(LP, &[wide_position(1_000, 0)]).unwrap_err();
    assert!(matches!(err, SimError::InsufficientInventory { .. }));

    let p = sim.portfolio_of(LP).unwrap();
    assert_eq!(p.inventory, Inventory::new(100, 100));
    assert!(p.positions.is_empty());
}

#[test]
fn empty_tick_range_is_rejected() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(100, 100), &[]);

    let bad = Position { tick_lower: 50, tick_upper: 50, amount0: 10, amount1: 10 };
    assert!(matches!(
        sim.apply_rebalance(LP, &[bad]),
        Err(SimError::InvalidPosition { .. })
    ));
}

#[test]
fn in_range_position_earns_swap_fees() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(0, 0), &[wide_position(10_000, 10_000)]);

    // 1_000_000 token1 in at 0.3%: the only in-range liquidity takes it all
    let events = vec![swap(10, 0, 1_000_000, 1.0002)];
    sim.advance_to(10, &events);

    let (fees0, fees1) = sim.portfolio_of(LP).unwrap().fees_accrued;
    assert_eq!(fees0, 0.0);
    assert!((fees1 - 3_000.0).abs() < 1e-6, "fees1 = {fees1}");
}

#[test]
fn out_of_range_position_earns_nothing() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    let below = Position { tick_lower: -2_000, tick_upper: -1_000, amount0: 0, amount1: 10_000 };
    sim.add_owner(LP, Inventory::new(0, 0), &[below]);

    let events = vec![swap(10, 0, 1_000_000, 1.0002)];
    sim.advance_to(10, &events);

    assert_eq!(sim.portfolio_of(LP).unwrap().fees_accrued, (0.0, 0.0));
}

#[test]
fn fees_split_pro_rata_with_pool_liquidity() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(0, 0), &[wide_position(10_000, 10_000)]);

    let tracked = math::liquidity_for_amounts(10_000, 10_000, -10_000, 10_000, 1.0);
    // mint the same liquidity on the pool side: the tracked position now
    // holds exactly half of the active range
    let events = vec![
        PoolEvent {
            block_number: 5,
            log_index: 0,
            kind: PoolEventKind::Mint {
                tick_lower: -10_000,
                tick_upper: 10_000,
                liquidity: tracked as u128,
            },
        },
        swap(10, 0, 1_000_000, 1.0002),
    ];
    sim.advance_to(10, &events);

    let (_, fees1) = sim.portfolio_of(LP).unwrap().fees_accrued;
    assert!((fees1 - 1_500.0).abs() < 1.0, "fees1 = {fees1}");
}

#[test]
fn replay_is_deterministic() {
    let run = || {
        let mut sim = PoolSimulator::new(state_at(1.0, 3000));
        sim.add_owner(LP, Inventory::new(50_000, 50_000), &[wide_position(10_000, 10_000)]);
        let events = vec![
            swap(5, 0, 250_000, 1.0001),
            swap(5, 1, 125_000, 1.0003),
            swap(9, 0, 500_000, 1.0002),
        ];
        sim.advance_to(9, &events);
        sim.close_all(LP).unwrap();
        let p = sim.portfolio_of(LP).unwrap();
        (p.inventory, p.fees_accrued.0.to_bits(), p.fees_accrued.1.to_bits())
    };

    assert_eq!(run(), run());
}

#[test]
fn price_move_shifts_composition_toward_token1() {
    let mut sim = PoolSimulator::new(state_at(1.0, 3000));
    sim.add_owner(LP, Inventory::new(0, 0), &[wide_position(10_000, 10_000)]);

    // price doubles within the range: position sells token0 for token1
    let events = vec![swap(10, 0, 0, 2.0)];
    sim.advance_to(10, &events);
    sim.close_all(LP).unwrap();

    let p = sim.portfolio_of(LP).unwrap();
    assert!(p.inventory.amount0 < 10_000, "amount0 = {}", p.inventory.amount0);
    assert!(p.inventory.amount1 > 10_000, "amount1 = {}", p.inventory.amount1);
}
