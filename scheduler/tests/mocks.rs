use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use miner::transport::{MinerTransport, TransportError};
use miner::types::{MinerId, MinerInfo, RebalanceQuery, RebalanceResponse};
use reputation::model::{
    Job, MinerScore, Prediction, RebalanceDecision, Round, RoundId, ScoreUpdate,
};
use reputation::store::ReputationStore;
use scheduler::{ExecutorSink, SinkError};

/// Transport whose miners always accept and keep their current positions.
pub struct HoldTransport;

#[async_trait]
impl MinerTransport for HoldTransport {
    async fn query(
        &self,
        _miner: &MinerInfo,
        request: &RebalanceQuery,
        _deadline: Duration,
    ) -> Result<RebalanceResponse, TransportError> {
        Ok(RebalanceResponse::rebalance(request.current_positions.clone()))
    }
}

/// In-memory `ReputationStore` that records what the scheduler did to it.
#[derive(Default)]
pub struct MockStore {
    pub updates: Mutex<Vec<(String, ScoreUpdate)>>,
    pub archived: Mutex<Vec<(Round, Vec<Prediction>)>>,
    pub participation: Mutex<HashSet<(MinerId, String, NaiveDate)>>,
    pub eligible: Mutex<Vec<MinerId>>,
    pub live_recorded: Mutex<HashSet<RoundId>>,
}

#[async_trait]
impl ReputationStore for MockStore {
    async fn load_jobs(&self) -> anyhow::Result<Vec<Job>> {
        Ok(vec![])
    }

    async fn save_job(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_scores(&self, _job_id: &str) -> anyhow::Result<Vec<MinerScore>> {
        Ok(vec![])
    }

    async fn update_scores(
        &self,
        job_id: &str,
        updates: &[ScoreUpdate],
        _now_ms: u64,
    ) -> anyhow::Result<()> {
        let mut guard = self.updates.lock().await;
        for update in updates {
            guard.push((job_id.to_string(), update.clone()));
        }
        Ok(())
    }

    async fn record_participation(
        &self,
        miner_id: &str,
        job_id: &str,
        utc_date: NaiveDate,
    ) -> anyhow::Result<()> {
        self.participation
            .lock()
            .await
            .insert((miner_id.to_string(), job_id.to_string(), utc_date));
        Ok(())
    }

    async fn archive_round(
        &self,
        round: &Round,
        predictions: &[Prediction],
    ) -> anyhow::Result<()> {
        self.archived.lock().await.push((round.clone(), predictions.to_vec()));
        Ok(())
    }

    async fn load_round(
        &self,
        round_id: RoundId,
    ) -> anyhow::Result<Option<(Round, Vec<Prediction>)>> {
        Ok(self
            .archived
            .lock()
            .await
            .iter()
            .find(|(round, _)| round.round_id == round_id)
            .cloned())
    }

    async fn list_eligible(
        &self,
        _job_id: &str,
        _as_of: NaiveDate,
    ) -> anyhow::Result<Vec<MinerId>> {
        Ok(self.eligible.lock().await.clone())
    }

    async fn live_execution_recorded(&self, round_id: RoundId) -> anyhow::Result<bool> {
        Ok(self.live_recorded.lock().await.contains(&round_id))
    }

    async fn record_live_execution(
        &self,
        round_id: RoundId,
        _decisions: &[RebalanceDecision],
        _now_ms: u64,
    ) -> anyhow::Result<()> {
        self.live_recorded.lock().await.insert(round_id);
        Ok(())
    }
}

/// Sink that records handoffs and can be told to fail a few times first.
#[derive(Default)]
pub struct CollectingSink {
    pub submitted: Mutex<Vec<(RoundId, usize)>>,
    pub fail_first: AtomicU32,
}

#[async_trait]
impl ExecutorSink for CollectingSink {
    async fn submit(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Unavailable("injected outage".into()));
        }
        self.submitted.lock().await.push((round_id, decisions.len()));
        Ok(())
    }
}
