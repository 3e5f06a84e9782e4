//! PoL (protocol-owned-liquidity) scoring.
//
//  Pure functions: the executor produces portfolios, this module turns them
//  into ranked scores and EMA updates. No async, no IO.

use std::cmp::Ordering;

use miner::types::MinerId;
use reputation::model::{FinalPortfolio, Prediction, Round, ScoreUpdate};

use crate::validate::Violation;

/// How disqualifications interact with reputation.
///
/// Violations fold a 0 into the EMA by default; refusals never touch it.
#[derive(Debug, Clone, Copy)]
pub struct ScorePolicy {
    pub ema_on_violation: bool,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self { ema_on_violation: true }
    }
}

/// Sharpness of the smooth-max over the two per-token loss ratios.
pub const SMOOTH_MAX_SHARPNESS: f64 = 20.0;

/// Steepness of the inventory-loss penalty `exp(-10 * inv_loss)`.
pub const PENALTY_STEEPNESS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub value_gain: f64,
    pub inv_loss: f64,
    pub penalty: f64,
    pub score: f64,
}

/// Smooth approximation of `max(r0, r1)`, exact at `r0 == r1`.
pub fn smooth_max(r0: f64, r1: f64) -> f64 {
    let k = SMOOTH_MAX_SHARPNESS;
    (((k * r0).exp() + (k * r1).exp()).ln() - std::f64::consts::LN_2) / k
}

/// Fraction of the initial holding that was lost, clamped at 0.
pub fn loss_ratio(initial: u64, final_amount: u64) -> f64 {
    if initial == 0 {
        return 0.0;
    }
    let lost = initial.saturating_sub(final_amount) as f64;
    lost / initial as f64
}

/// Score one portfolio against the round's starting holdings.
///
/// Gains are discounted by the inventory-loss penalty; losses are amplified
/// by it, so shedding inventory never pays.
pub fn pol_score(
    initial_amounts: (u64, u64),
    portfolio: &FinalPortfolio,
    initial_price: f64,
    final_price: f64,
) -> ScoreBreakdown {
    let (initial0, initial1) = initial_amounts;
    let final0 = portfolio.inventory.amount0;
    let final1 = portfolio.inventory.amount1;
    let (fees0, fees1) = portfolio.fees_accrued;

    let initial_value = initial0 as f64 * initial_price + initial1 as f64;
    let fees_in_token1 = fees0 * final_price + fees1;
    let final_value = final0 as f64 * final_price + final1 as f64 + fees_in_token1;
    let value_gain = final_value - initial_value;

    let inv_loss = smooth_max(loss_ratio(initial0, final0), loss_ratio(initial1, final1));
    let penalty = (-PENALTY_STEEPNESS * inv_loss).exp();

    let score = if value_gain >= 0.0 { value_gain * penalty } else { value_gain / penalty };

    ScoreBreakdown { value_gain, inv_loss, penalty, score }
}

/// Result of scoring one round.
#[derive(Debug)]
pub struct RankOutcome {
    /// Highest-ranked miner, if anyone was scorable.
    pub winner: Option<MinerId>,
    /// EMA updates to fold into the reputation store.
    pub updates: Vec<ScoreUpdate>,
}

/// Score and rank a round's predictions in place.
///
/// Refused miners are skipped entirely. Violating miners score 0 and, per
/// `policy`, still produce an EMA update. Ties break by lower inventory
/// loss, then miner id; violators carry infinite loss so an honest zero
/// outranks them.
pub fn score_round(
    round: &Round,
    predictions: &mut [Prediction],
    initial_price: f64,
    final_price: f64,
    policy: &ScorePolicy,
) -> RankOutcome {
    let initial_amounts = round.initial_amounts();

    // (index, score, inv_loss) for everything that did not refuse
    let mut ranked: Vec<(usize, f64, f64)> = Vec::new();
    for (i, prediction) in predictions.iter_mut().enumerate() {
        if !prediction.accepted {
            continue;
        }
        let (score, inv_loss) = if prediction.violation.is_some() {
            (0.0, f64::INFINITY)
        } else {
            let breakdown = pol_score(
                initial_amounts,
                &prediction.final_portfolio,
                initial_price,
                final_price,
            );
            if breakdown.inv_loss > round.constraints.max_il {
                // settled inventory loss beyond the allowed fraction
                prediction.violation = Some(Violation::MaxIlExceeded.to_string());
                (0.0, breakdown.inv_loss)
            } else {
                (breakdown.score, breakdown.inv_loss)
            }
        };
        prediction.raw_score = Some(score);
        ranked.push((i, score, inv_loss));
    }

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
            .then_with(|| predictions[a.0].miner_id.cmp(&predictions[b.0].miner_id))
    });

    let n = ranked.len();
    for (place, (idx, _, _)) in ranked.iter().enumerate() {
        predictions[*idx].normalized_rank = Some((n - place) as f64 / n as f64);
    }

    let winner = ranked.first().map(|(idx, _, _)| predictions[*idx].miner_id.clone());
    let updates = ranked
        .iter()
        .filter(|(idx, _, _)| policy.ema_on_violation || predictions[*idx].violation.is_none())
        .map(|(idx, score, _)| ScoreUpdate {
            miner_id: predictions[*idx].miner_id.clone(),
            score: *score,
            round_type: round.round_type,
        })
        .collect();

    RankOutcome { winner, updates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner::types::{Constraints, RoundType};
    use pool::types::Inventory;
    use reputation::model::RoundId;

    fn portfolio(amount0: u64, amount1: u64, fees1: f64) -> FinalPortfolio {
        FinalPortfolio {
            positions: vec![],
            inventory: Inventory::new(amount0, amount1),
            fees_accrued: (0.0, fees1),
            value_in_token1: 0.0,
            valued_at_block: 0,
        }
    }

    fn round() -> Round {
        Round {
            round_id: RoundId::nil(),
            job_id: "job-1".to_string(),
            round_type: RoundType::Eval,
            start_block: 0,
            end_block: 100,
            started_at_ms: 0,
            finished_at_ms: None,
            constraints: Constraints { max_il: 0.5, min_tick_width: 1, max_rebalances: 4 },
            initial_inventory: Inventory::new(1_000, 2_000),
            initial_positions: vec![],
        }
    }

    fn prediction(miner_id: &str, p: FinalPortfolio) -> Prediction {
        Prediction {
            round_id: RoundId::nil(),
            miner_id: miner_id.to_string(),
            accepted: true,
            responded: true,
            violation: None,
            final_portfolio: p,
            raw_score: None,
            normalized_rank: None,
            decisions: vec![],
        }
    }

    #[test]
    fn smooth_max_is_exact_at_equal_inputs() {
        assert_eq!(smooth_max(0.0, 0.0), 0.0);
        assert!((smooth_max(0.3, 0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn smooth_max_dominated_by_larger_ratio() {
        let out = smooth_max(0.0, 0.5);
        assert!(out >= 0.5 - std::f64::consts::LN_2 / SMOOTH_MAX_SHARPNESS);
        assert!(out < 0.5 + 0.05);
    }

    #[test]
    fn preserved_inventory_scores_exactly_the_fees() {
        // price unchanged, amounts unchanged: gain is the fees, no penalty
        let b = pol_score((1_000, 2_000), &portfolio(1_000, 2_000, 25.0), 1.0, 1.0);
        assert_eq!(b.inv_loss, 0.0);
        assert_eq!(b.penalty, 1.0);
        assert!((b.score - 25.0).abs() < 1e-9);
    }

    #[test]
    fn inventory_loss_discounts_a_gain() {
        // token0 halved but token1 grew enough for a net gain
        let b = pol_score((1_000, 2_000), &portfolio(500, 3_000, 0.0), 1.0, 1.0);
        assert!(b.value_gain > 0.0);
        assert!(b.inv_loss > 0.4);
        assert!(b.penalty < 1.0);
        assert!(b.score < b.value_gain);
    }

    #[test]
    fn inventory_loss_amplifies_a_loss() {
        let b = pol_score((1_000, 2_000), &portfolio(500, 2_000, 0.0), 1.0, 1.0);
        assert!(b.value_gain < 0.0);
        assert!(b.score < b.value_gain, "losing inventory must hurt more, not less");
    }

    #[test]
    fn zero_initial_amount_cannot_divide_by_zero() {
        let b = pol_score((0, 2_000), &portfolio(0, 2_000, 0.0), 1.0, 1.0);
        assert_eq!(b.inv_loss, 0.0);
        assert_eq!(b.score, 0.0);
    }

    #[test]
    fn ranking_orders_by_score_then_loss_then_id() {
        let round = round();
        let mut predictions = vec![
            // same value gain (+100), but "b" sheds token0 to get it
            prediction("b", portfolio(900, 2_200, 0.0)),
            prediction("a", portfolio(1_000, 2_100, 0.0)),
            prediction("c", portfolio(1_000, 2_000, 0.0)),
        ];

        let outcome = score_round(&round, &mut predictions, 1.0, 1.0, &ScorePolicy::default());

        assert_eq!(outcome.winner.as_deref(), Some("a"));
        assert_eq!(predictions[1].normalized_rank, Some(1.0));
        assert!(predictions[0].raw_score.unwrap() < predictions[1].raw_score.unwrap());
        assert_eq!(outcome.updates.len(), 3);
    }

    #[test]
    fn refusals_are_skipped_violations_score_zero() {
        let round = round();
        let mut predictions = vec![
            prediction("quitter", portfolio(1_000, 2_000, 0.0)),
            prediction("cheater", portfolio(1_000, 2_000, 0.0)),
            prediction("honest", portfolio(1_000, 2_000, 0.0)),
        ];
        predictions[0].accepted = false;
        predictions[1].violation = Some("too_many_rebalances".to_string());

        let outcome = score_round(&round, &mut predictions, 1.0, 1.0, &ScorePolicy::default());

        // refused miner untouched
        assert_eq!(predictions[0].raw_score, None);
        assert_eq!(predictions[0].normalized_rank, None);
        // violator recorded at zero, ranked below the honest zero
        assert_eq!(predictions[1].raw_score, Some(0.0));
        assert_eq!(outcome.winner.as_deref(), Some("honest"));

        let update_ids: Vec<_> = outcome.updates.iter().map(|u| u.miner_id.as_str()).collect();
        assert_eq!(update_ids, vec!["honest", "cheater"]);
    }

    #[test]
    fn violation_updates_can_be_policied_off() {
        let round = round();
        let mut predictions = vec![prediction("cheater", portfolio(1_000, 2_000, 0.0))];
        predictions[0].violation = Some("tick_width".to_string());

        let policy = ScorePolicy { ema_on_violation: false };
        let outcome = score_round(&round, &mut predictions, 1.0, 1.0, &policy);

        assert_eq!(predictions[0].raw_score, Some(0.0));
        assert!(outcome.updates.is_empty());
    }

    #[test]
    fn excessive_inventory_loss_disqualifies() {
        let round = round(); // max_il = 0.5
        // 70% of token0 shed for token1: well past the limit
        let mut predictions = vec![prediction("churner", portfolio(300, 2_700, 0.0))];

        let outcome = score_round(&round, &mut predictions, 1.0, 1.0, &ScorePolicy::default());

        assert_eq!(predictions[0].violation.as_deref(), Some("max_il_exceeded"));
        assert_eq!(predictions[0].raw_score, Some(0.0));
        assert_eq!(outcome.updates[0].score, 0.0);
    }

    #[test]
    fn single_miner_wins_regardless_of_sign() {
        let round = round();
        let mut predictions = vec![prediction("solo", portfolio(800, 1_900, 0.0))];

        let outcome = score_round(&round, &mut predictions, 1.0, 1.0, &ScorePolicy::default());

        assert!(predictions[0].raw_score.unwrap() < 0.0);
        assert_eq!(outcome.winner.as_deref(), Some("solo"));
        assert_eq!(predictions[0].normalized_rank, Some(1.0));
    }

    #[test]
    fn empty_prediction_list_has_no_winner() {
        let round = round();
        let outcome = score_round(&round, &mut [], 1.0, 1.0, &ScorePolicy::default());
        assert!(outcome.winner.is_none());
        assert!(outcome.updates.is_empty());
    }
}
