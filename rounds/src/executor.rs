//! The round executor.
//!
//! For one round it:
//!   1. Fetches the round's event window once (with retry) and the starting
//!      price observation.
//!   2. Builds one simulator per miner over the shared stream, plus a
//!      reference simulator that tracks pool state independently.
//!   3. Walks the checkpoint schedule: advances simulators, fans out
//!      rebalance queries in parallel under a hard per-miner deadline, and
//!      applies accepted decisions.
//!   4. Settles every surviving portfolio at the end block and emits one
//!      prediction per miner.
//!
//! Every miner sees the same checkpoint blocks and the same event-stream
//! prefix at each checkpoint; each miner's simulator advances strictly
//! monotonically. Individual miner failures never fail the round; only an
//! unavailable events source does.

use std::sync::Arc;

use futures::future::join_all;

use events::EventsSource;
use miner::transport::{MinerTransport, TransportError};
use miner::types::{MinerInfo, RebalanceQuery, RebalanceResponse};
use pool::math;
use pool::sim::{PoolSimulator, SimError};
use pool::types::{PoolEvent, PoolState};
use reputation::model::{FinalPortfolio, Job, Prediction, RebalanceDecision, Round};

use crate::types::{ExecutorConfig, RoundError, RoundOutcome};
use crate::validate::{self, Violation};

pub struct RoundExecutor<T, E> {
    transport: Arc<T>,
    events: Arc<E>,
    cfg: ExecutorConfig,
}

/// Per-miner state for one round.
struct MinerRun {
    info: MinerInfo,
    sim: PoolSimulator,
    consecutive_failures: u32,
    refused: bool,
    responded: bool,
    violation: Option<Violation>,
    rebalance_count: u32,
    decisions: Vec<RebalanceDecision>,
    /// Portfolio snapshot taken when the miner froze (refusal or violation).
    frozen: Option<FinalPortfolio>,
}

impl MinerRun {
    fn active(&self) -> bool {
        !self.refused && self.violation.is_none() && self.frozen.is_none()
    }

    /// Stop simulating this miner and keep its portfolio as of now.
    fn freeze(&mut self) {
        if self.frozen.is_some() {
            return;
        }
        let owner = &self.info.miner_id;
        if let (Some(portfolio), Some(value)) =
            (self.sim.portfolio_of(owner), self.sim.portfolio_value(owner))
        {
            self.frozen = Some(FinalPortfolio {
                positions: portfolio.positions,
                inventory: portfolio.inventory,
                fees_accrued: portfolio.fees_accrued,
                value_in_token1: value,
                valued_at_block: self.sim.state().block,
            });
        }
    }
}

/// Blocks at which miners are queried: `start, start+Δ, …`, always ending
/// at `end` even when the stride does not land on it.
fn checkpoint_schedule(start_block: u64, end_block: u64, interval: u64) -> Vec<u64> {
    let step = interval.max(1);
    let mut blocks: Vec<u64> = (start_block..=end_block).step_by(step as usize).collect();
    if blocks.last() != Some(&end_block) {
        blocks.push(end_block);
    }
    blocks
}

impl<T, E> RoundExecutor<T, E>
where
    T: MinerTransport,
    E: EventsSource,
{
    pub fn new(transport: Arc<T>, events: Arc<E>, cfg: ExecutorConfig) -> Self {
        Self { transport, events, cfg }
    }

    /// Run one round to completion.
    ///
    /// Completes even when every miner fails; errs only when the events
    /// source cannot serve the round's block range.
    pub async fn run(
        &self,
        job: &Job,
        round: &Round,
        miners: &[MinerInfo],
    ) -> Result<RoundOutcome, RoundError> {
        let stream = self.fetch_events(&job.pair_address, round.start_block, round.end_block).await?;
        let initial_state = self.initial_state(job, round).await?;
        let initial_price = initial_state.sqrt_price * initial_state.sqrt_price;

        // reference simulator: price/tick evolution independent of miners,
        // so the round has a final price even if everyone freezes
        let mut reference = PoolSimulator::new(initial_state);

        let mut runs: Vec<MinerRun> = miners
            .iter()
            .map(|info| {
                let mut sim = PoolSimulator::new(initial_state);
                sim.add_owner(&info.miner_id, round.initial_inventory, &round.initial_positions);
                MinerRun {
                    info: info.clone(),
                    sim,
                    consecutive_failures: 0,
                    refused: false,
                    responded: false,
                    violation: None,
                    rebalance_count: 0,
                    decisions: Vec::new(),
                    frozen: None,
                }
            })
            .collect();

        let checkpoints =
            checkpoint_schedule(round.start_block, round.end_block, job.checkpoint_interval);

        for &block in &checkpoints {
            reference.advance_to(block, &stream);
            for run in runs.iter_mut().filter(|r| r.active()) {
                run.sim.advance_to(block, &stream);
            }

            let queries: Vec<(usize, RebalanceQuery)> = runs
                .iter()
                .enumerate()
                .filter(|(_, r)| r.active())
                .filter_map(|(i, r)| self.build_query(job, round, r, block).map(|q| (i, q)))
                .collect();

            let responses = join_all(queries.iter().map(|(i, query)| {
                let transport = Arc::clone(&self.transport);
                let info = runs[*i].info.clone();
                let deadline = self.cfg.miner_timeout;
                async move {
                    match tokio::time::timeout(deadline, transport.query(&info, query, deadline))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout),
                    }
                }
            }))
            .await;

            for ((i, _), response) in queries.iter().zip(responses) {
                self.process_response(&mut runs[*i], response, block, round);
            }
        }

        reference.advance_to(round.end_block, &stream);
        let final_price = reference.price();

        let predictions = runs
            .iter_mut()
            .map(|run| self.settle(run, round, &stream))
            .collect();

        Ok(RoundOutcome { predictions, initial_price, final_price })
    }

    async fn initial_state(&self, job: &Job, round: &Round) -> Result<PoolState, RoundError> {
        let mut backoff = self.cfg.events_backoff;
        let mut last = String::new();
        for attempt in 1..=self.cfg.events_attempts {
            match self.events.price_at_or_before(&job.pair_address, round.start_block).await {
                Ok(Some(observation)) => {
                    let sqrt_price = math::sqrt_price_of_x96(observation.sqrt_price_x96);
                    let price = sqrt_price * sqrt_price;
                    return Ok(PoolState {
                        block: round.start_block,
                        sqrt_price,
                        current_tick: math::tick_of_price(price),
                        fee_tier: job.fee_tier,
                    });
                }
                Ok(None) => return Err(RoundError::NoPriceData { block: round.start_block }),
                Err(err) => {
                    last = err.to_string();
                    tracing::warn!(attempt, error = %err, "price lookup failed");
                    if attempt < self.cfg.events_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(RoundError::EventsUnavailable { attempts: self.cfg.events_attempts, last })
    }

    async fn fetch_events(
        &self,
        pool_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, RoundError> {
        let mut backoff = self.cfg.events_backoff;
        let mut last = String::new();
        for attempt in 1..=self.cfg.events_attempts {
            match self.events.events_in(pool_address, from_block, to_block).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    last = err.to_string();
                    tracing::warn!(attempt, error = %err, "events query failed");
                    if attempt < self.cfg.events_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(RoundError::EventsUnavailable { attempts: self.cfg.events_attempts, last })
    }

    fn build_query(
        &self,
        job: &Job,
        round: &Round,
        run: &MinerRun,
        block: u64,
    ) -> Option<RebalanceQuery> {
        let portfolio = run.sim.portfolio_of(&run.info.miner_id)?;
        Some(RebalanceQuery {
            job_id: job.job_id.clone(),
            vault_address: job.vault_address.clone(),
            pair_address: job.pair_address.clone(),
            chain_id: job.chain_id,
            round_id: round.round_id.to_string(),
            round_type: round.round_type,
            block_number: block,
            current_price: run.sim.price(),
            current_positions: portfolio.positions,
            inventory_remaining: portfolio.inventory,
            rebalances_so_far: run.rebalance_count,
            constraints: round.constraints,
        })
    }

    fn process_response(
        &self,
        run: &mut MinerRun,
        response: Result<RebalanceResponse, TransportError>,
        block: u64,
        round: &Round,
    ) {
        let miner_id = run.info.miner_id.clone();
        let response = match response {
            Err(err) => {
                run.consecutive_failures += 1;
                tracing::debug!(
                    miner_id = %miner_id,
                    block,
                    failures = run.consecutive_failures,
                    error = %err,
                    "checkpoint query failed"
                );
                if run.consecutive_failures >= self.cfg.max_consecutive_failures {
                    tracing::info!(miner_id = %miner_id, block, "miner dropped after repeated failures");
                    run.refused = true;
                    run.freeze();
                }
                return;
            }
            Ok(response) => response,
        };

        if !response.accepted {
            tracing::info!(
                miner_id = %miner_id,
                block,
                reason = response.refusal_reason.as_deref().unwrap_or("unspecified"),
                "miner refused the round"
            );
            run.refused = true;
            run.freeze();
            return;
        }

        run.consecutive_failures = 0;
        run.responded = true;

        let current = match run.sim.portfolio_of(&miner_id) {
            Some(portfolio) => portfolio.positions,
            None => return,
        };
        if response.is_noop(&current) {
            return;
        }

        if let Err(violation) = validate::check_positions(&response.desired_positions, &round.constraints)
        {
            tracing::info!(miner_id = %miner_id, block, %violation, "rebalance rejected");
            run.violation = Some(violation);
            run.freeze();
            return;
        }

        match run.sim.apply_rebalance(&miner_id, &response.desired_positions) {
            Ok(()) => {
                run.rebalance_count += 1;
                run.decisions
                    .push(RebalanceDecision { block, positions: response.desired_positions });
                if run.rebalance_count > round.constraints.max_rebalances {
                    tracing::info!(miner_id = %miner_id, block, "rebalance budget exceeded");
                    run.violation = Some(Violation::TooManyRebalances);
                    run.freeze();
                }
            }
            Err(SimError::InsufficientInventory { .. }) => {
                tracing::info!(miner_id = %miner_id, block, "rebalance overdraws inventory");
                run.violation = Some(Violation::InsufficientInventory);
                run.freeze();
            }
            Err(SimError::InvalidPosition { .. }) => {
                run.violation = Some(Violation::EmptyTickRange);
                run.freeze();
            }
            Err(SimError::UnknownOwner(owner)) => {
                tracing::error!(owner = %owner, "simulator lost an owner mid-round");
            }
        }
    }

    /// Close out one miner at the end of the round and build its prediction.
    fn settle(&self, run: &mut MinerRun, round: &Round, stream: &[PoolEvent]) -> Prediction {
        let owner = run.info.miner_id.clone();

        let final_portfolio = match run.frozen.take() {
            Some(frozen) => frozen,
            None => {
                run.sim.advance_to(round.end_block, stream);
                if let Err(err) = run.sim.close_all(&owner) {
                    tracing::error!(miner_id = %owner, error = %err, "final close failed");
                }
                let (portfolio, value) = match (
                    run.sim.portfolio_of(&owner),
                    run.sim.portfolio_value(&owner),
                ) {
                    (Some(p), Some(v)) => (p, v),
                    _ => (
                        pool::sim::Portfolio {
                            positions: vec![],
                            inventory: round.initial_inventory,
                            fees_accrued: (0.0, 0.0),
                        },
                        0.0,
                    ),
                };
                FinalPortfolio {
                    positions: portfolio.positions,
                    inventory: portfolio.inventory,
                    fees_accrued: portfolio.fees_accrued,
                    value_in_token1: value,
                    valued_at_block: round.end_block,
                }
            }
        };

        Prediction {
            round_id: round.round_id,
            miner_id: owner,
            accepted: !run.refused,
            responded: run.responded,
            violation: run.violation.map(|v| v.to_string()),
            final_portfolio,
            raw_score: None,
            normalized_rank: None,
            decisions: std::mem::take(&mut run.decisions),
        }
    }
}
