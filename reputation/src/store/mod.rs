pub mod sqlite_store;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::{Job, MinerScore, Prediction, RebalanceDecision, Round, RoundId, ScoreUpdate};
use miner::types::MinerId;

/// Durable reputation and round state for the coordinator.
///
/// Implementations must serialize score updates per job (callers from
/// different jobs may write in parallel) and keep `archive_round` and
/// `update_scores` transactional: a failed write leaves no partial state.
#[async_trait]
pub trait ReputationStore: Send + Sync {
    async fn load_jobs(&self) -> anyhow::Result<Vec<Job>>;
    async fn save_job(&self, job: &Job) -> anyhow::Result<()>;

    async fn get_scores(&self, job_id: &str) -> anyhow::Result<Vec<MinerScore>>;

    /// Fold score observations into the per-(miner, job) EMAs.
    async fn update_scores(
        &self,
        job_id: &str,
        updates: &[ScoreUpdate],
        now_ms: u64,
    ) -> anyhow::Result<()>;

    /// Mark that `miner_id` responded in an evaluation round on `utc_date`.
    async fn record_participation(
        &self,
        miner_id: &str,
        job_id: &str,
        utc_date: NaiveDate,
    ) -> anyhow::Result<()>;

    /// Append a completed round and its predictions. Append-only.
    async fn archive_round(&self, round: &Round, predictions: &[Prediction])
        -> anyhow::Result<()>;

    /// Read back one archived round, if present.
    async fn load_round(
        &self,
        round_id: RoundId,
    ) -> anyhow::Result<Option<(Round, Vec<Prediction>)>>;

    /// Miners with participation on each of the 7 calendar days ending at
    /// `as_of` (inclusive), sorted by miner id.
    async fn list_eligible(&self, job_id: &str, as_of: NaiveDate)
        -> anyhow::Result<Vec<MinerId>>;

    /// Whether a live round's decisions were already handed to the executor.
    async fn live_execution_recorded(&self, round_id: RoundId) -> anyhow::Result<bool>;

    async fn record_live_execution(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
        now_ms: u64,
    ) -> anyhow::Result<()>;
}
