//! The jobs scheduler.
//!
//! One independent loop per active job. Each tick (every `round_duration`)
//! it:
//!   1. Snapshots the miner registry and anchors a block window at the
//!      events source's latest ingested block.
//!   2. Runs an evaluation round against all registered miners and, when
//!      the previous tick's winner is live-eligible, a live round for that
//!      winner — concurrently, committed in eval-then-live order.
//!   3. Ranks and archives the results, folds score updates into the
//!      reputation store under its per-job lock, records participation,
//!      and hands winning live decisions to the live gate.
//!
//! Rounds for one job never overlap across ticks; distinct jobs run fully
//! concurrently. Shutdown grants in-flight rounds one grace period, then
//! drops them without archiving.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use common::TraceId;
use events::EventsSource;
use miner::registry::MinerRegistry;
use miner::transport::MinerTransport;
use miner::types::{MinerId, MinerInfo, RoundType};
use reputation::model::{Job, Round};
use reputation::store::ReputationStore;
use rounds::scoring::{self, ScorePolicy};
use rounds::{RoundExecutor, RoundOutcome};

use crate::live::LiveGate;
use crate::types::{now_ms, SchedulerConfig};

pub struct JobsScheduler<T, E, S, R> {
    executor: RoundExecutor<T, E>,
    events: Arc<E>,
    store: Arc<S>,
    registry: Arc<R>,
    live_gate: LiveGate,
    policy: ScorePolicy,
    cfg: SchedulerConfig,
}

impl<T, E, S, R> JobsScheduler<T, E, S, R>
where
    T: MinerTransport + 'static,
    E: EventsSource + 'static,
    S: ReputationStore + 'static,
    R: MinerRegistry + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: RoundExecutor<T, E>,
        events: Arc<E>,
        store: Arc<S>,
        registry: Arc<R>,
        live_gate: LiveGate,
        policy: ScorePolicy,
        cfg: SchedulerConfig,
    ) -> Self {
        Self { executor, events, store, registry, live_gate, policy, cfg }
    }

    /// Run every active job's loop until shutdown.
    pub async fn run(self: Arc<Self>, jobs: Vec<Job>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for job in jobs.into_iter().filter(|j| j.active) {
            let scheduler = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tracing::info!(job_id = %job.job_id, "job loop started");
            handles.push(tokio::spawn(async move {
                scheduler.run_job_loop(job, shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "job loop task failed");
            }
        }
    }

    async fn run_job_loop(&self, job: Job, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(job.round_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_winner: Option<MinerId> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                tracing::info!(job_id = %job.job_id, "job loop stopping");
                return;
            }

            let tick = self.on_tick(&job, last_winner.take());
            tokio::pin!(tick);
            tokio::select! {
                winner = &mut tick => {
                    last_winner = winner;
                }
                _ = shutdown.changed() => {
                    // grace period, then the round is dropped unarchived
                    match tokio::time::timeout(self.cfg.shutdown_grace, &mut tick).await {
                        Ok(_) => tracing::info!(job_id = %job.job_id, "in-flight round finished during grace"),
                        Err(_) => tracing::warn!(job_id = %job.job_id, "in-flight round cancelled, partial results discarded"),
                    }
                    return;
                }
            }
        }
    }

    /// Execute one scheduling tick for `job`: the evaluation round and, if
    /// the previous winner is eligible, the live round. Returns this tick's
    /// evaluation winner.
    pub async fn on_tick(&self, job: &Job, prev_winner: Option<MinerId>) -> Option<MinerId> {
        let trace = TraceId::default();

        let miners = match self.registry.active_miners().await {
            Ok(miners) => miners,
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "registry snapshot failed");
                return None;
            }
        };
        if miners.is_empty() {
            tracing::debug!(job_id = %job.job_id, "no registered miners this tick");
            return None;
        }

        let latest = match self.events.latest_block(&job.pair_address).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                tracing::warn!(job_id = %job.job_id, "no ingested blocks for pool yet");
                return None;
            }
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "latest block lookup failed");
                return None;
            }
        };
        let start_block = latest.saturating_sub(job.round_blocks);

        let eval_round = build_round(job, RoundType::Eval, start_block, latest);
        tracing::info!(
            job_id = %job.job_id,
            trace_id = %trace.as_str(),
            round_id = %eval_round.round_id,
            start_block,
            end_block = latest,
            miners = miners.len(),
            "evaluation round starting"
        );

        let live_setup = match prev_winner {
            Some(winner) => self.live_setup(job, &miners, winner, start_block, latest).await,
            None => None,
        };

        let soft_deadline = job.round_duration().mul_f64(self.cfg.soft_deadline_factor);
        let eval_fut =
            tokio::time::timeout(soft_deadline, self.executor.run(job, &eval_round, &miners));
        let live_fut = async {
            match &live_setup {
                Some((live_round, winner)) => Some(
                    tokio::time::timeout(
                        soft_deadline,
                        self.executor.run(job, live_round, std::slice::from_ref(winner)),
                    )
                    .await,
                ),
                None => None,
            }
        };
        let (eval_result, live_result) = tokio::join!(eval_fut, live_fut);

        // commit in eval-then-live order
        let next_winner = match eval_result {
            Err(_) => {
                tracing::warn!(job_id = %job.job_id, "evaluation round blew its soft deadline, discarded");
                None
            }
            Ok(Err(err)) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "evaluation round aborted");
                None
            }
            Ok(Ok(outcome)) => {
                self.commit_round(job, eval_round, outcome).await.map(|(winner, _)| winner)
            }
        };

        if let Some((live_round, _)) = live_setup {
            match live_result {
                Some(Err(_)) => {
                    tracing::warn!(job_id = %job.job_id, "live round blew its soft deadline, discarded")
                }
                Some(Ok(Err(err))) => {
                    tracing::warn!(job_id = %job.job_id, error = %err, "live round aborted")
                }
                Some(Ok(Ok(outcome))) => self.commit_live(job, live_round, outcome).await,
                None => {}
            }
        }

        next_winner
    }

    /// Build the live round for the previous winner, if it is still
    /// registered and has 7 days of continuous participation.
    async fn live_setup(
        &self,
        job: &Job,
        miners: &[MinerInfo],
        winner: MinerId,
        start_block: u64,
        end_block: u64,
    ) -> Option<(Round, MinerInfo)> {
        let info = miners.iter().find(|m| m.miner_id == winner)?.clone();

        let today = Utc::now().date_naive();
        let eligible = match self.store.list_eligible(&job.job_id, today).await {
            Ok(list) => list,
            Err(err) => {
                tracing::error!(job_id = %job.job_id, error = %err, "eligibility lookup failed");
                return None;
            }
        };
        if !eligible.contains(&winner) {
            tracing::debug!(job_id = %job.job_id, miner_id = %winner, "winner not yet live-eligible");
            return None;
        }

        Some((build_round(job, RoundType::Live, start_block, end_block), info))
    }

    /// Rank, archive, and score one completed round. Returns the winner
    /// and its applied decision sequence.
    async fn commit_round(
        &self,
        job: &Job,
        mut round: Round,
        outcome: RoundOutcome,
    ) -> Option<(MinerId, Vec<reputation::model::RebalanceDecision>)> {
        round.finished_at_ms = Some(now_ms());

        let mut predictions = outcome.predictions;
        let ranked = scoring::score_round(
            &round,
            &mut predictions,
            outcome.initial_price,
            outcome.final_price,
            &self.policy,
        );
        // a disqualified strategy never gets promoted or executed, even if
        // it topped an all-negative field at score zero
        let winner_entry = ranked.winner.as_ref().and_then(|winner| {
            predictions
                .iter()
                .find(|p| &p.miner_id == winner && p.violation.is_none())
                .map(|p| (winner.clone(), p.decisions.clone()))
        });

        if let Err(err) = self.store.archive_round(&round, &predictions).await {
            tracing::error!(job_id = %job.job_id, round_id = %round.round_id, error = %err, "round archive failed");
            return None;
        }
        if let Err(err) = self.store.update_scores(&job.job_id, &ranked.updates, now_ms()).await {
            tracing::error!(job_id = %job.job_id, error = %err, "score update failed");
            return None;
        }

        if round.round_type == RoundType::Eval {
            let today = Utc::now().date_naive();
            for prediction in predictions.iter().filter(|p| p.responded) {
                if let Err(err) = self
                    .store
                    .record_participation(&prediction.miner_id, &job.job_id, today)
                    .await
                {
                    tracing::error!(miner_id = %prediction.miner_id, error = %err, "participation write failed");
                }
            }
        }

        tracing::info!(
            job_id = %job.job_id,
            round_id = %round.round_id,
            round_type = %round.round_type,
            winner = ranked.winner.as_deref().unwrap_or("none"),
            "round committed"
        );
        winner_entry
    }

    /// Commit a live round and hand the winner's decisions to the gate.
    async fn commit_live(&self, job: &Job, round: Round, outcome: RoundOutcome) {
        let round_id = round.round_id;
        // a refused or violating live round produces no winner and nothing
        // reaches the executor
        if let Some((_, decisions)) = self.commit_round(job, round, outcome).await {
            self.live_gate.enqueue(round_id, decisions);
        }
    }
}

fn build_round(job: &Job, round_type: RoundType, start_block: u64, end_block: u64) -> Round {
    Round {
        round_id: uuid::Uuid::new_v4(),
        job_id: job.job_id.clone(),
        round_type,
        start_block,
        end_block,
        started_at_ms: now_ms(),
        finished_at_ms: None,
        constraints: job.constraints,
        initial_inventory: job.seed_inventory,
        initial_positions: Vec::new(),
    }
}
