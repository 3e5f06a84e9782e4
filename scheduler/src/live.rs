//! The live gate.
//!
//! Winning decisions from live rounds leave the coordinator through here:
//! an at-least-once handoff queue in front of the external executor sink,
//! deduplicated by round id so the executor sees each round at most once.
//! A full queue or a dead sink never blocks round scheduling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use reputation::model::{RebalanceDecision, RoundId};
use reputation::store::ReputationStore;

use crate::types::now_ms;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("executor sink unavailable: {0}")]
    Unavailable(String),
}

/// Downstream on-chain executor. Implementations must be idempotent by
/// `round_id`: replaying a handoff is a no-op.
#[async_trait]
pub trait ExecutorSink: Send + Sync {
    async fn submit(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError>;
}

/// Sink wired by `--dry-run`: logs the handoff and does nothing on chain.
pub struct DryRunSink;

#[async_trait]
impl ExecutorSink for DryRunSink {
    async fn submit(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError> {
        tracing::info!(
            round_id = %round_id,
            decisions = decisions.len(),
            "dry run: suppressing executor handoff"
        );
        Ok(())
    }
}

struct LiveHandoff {
    round_id: RoundId,
    decisions: Vec<RebalanceDecision>,
}

/// Handle for queueing live handoffs; the delivery worker runs in its own
/// task for the life of the process.
#[derive(Clone)]
pub struct LiveGate {
    tx: mpsc::Sender<LiveHandoff>,
}

impl LiveGate {
    pub fn start<S, K>(store: Arc<S>, sink: Arc<K>) -> Self
    where
        S: ReputationStore + 'static,
        K: ExecutorSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<LiveHandoff>(256);
        tokio::spawn(async move {
            while let Some(handoff) = rx.recv().await {
                deliver(store.as_ref(), sink.as_ref(), handoff).await;
            }
        });
        Self { tx }
    }

    /// Queue one handoff. Never blocks; an overflowing queue drops the
    /// handoff with an error log rather than stalling the scheduler.
    pub fn enqueue(&self, round_id: RoundId, decisions: Vec<RebalanceDecision>) {
        if let Err(err) = self.tx.try_send(LiveHandoff { round_id, decisions }) {
            tracing::error!(round_id = %round_id, error = %err, "live handoff queue full, dropping");
        }
    }
}

const MAX_ATTEMPTS: u32 = 10;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

async fn deliver<S, K>(store: &S, sink: &K, handoff: LiveHandoff)
where
    S: ReputationStore + ?Sized,
    K: ExecutorSink + ?Sized,
{
    match store.live_execution_recorded(handoff.round_id).await {
        Ok(true) => {
            tracing::debug!(round_id = %handoff.round_id, "handoff already delivered, skipping");
            return;
        }
        Ok(false) => {}
        // cannot prove it was delivered; submit anyway, the sink dedupes
        Err(err) => {
            tracing::error!(round_id = %handoff.round_id, error = %err, "dedup lookup failed")
        }
    }

    let mut backoff = Duration::from_secs(1);
    for attempt in 1..=MAX_ATTEMPTS {
        match sink.submit(handoff.round_id, &handoff.decisions).await {
            Ok(()) => {
                if let Err(err) = store
                    .record_live_execution(handoff.round_id, &handoff.decisions, now_ms())
                    .await
                {
                    tracing::error!(round_id = %handoff.round_id, error = %err, "failed to record live execution");
                }
                return;
            }
            Err(err) => {
                tracing::warn!(
                    round_id = %handoff.round_id,
                    attempt,
                    error = %err,
                    "executor sink rejected handoff"
                );
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
    tracing::error!(round_id = %handoff.round_id, "giving up on live handoff");
}
