pub mod cli;
pub mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use common::init_logger;
use events::SqliteEventsSource;
use miner::http::{HttpMinerTransport, ValidatorIdentity};
use miner::registry::StaticRegistry;
use reputation::{ReputationStore, SqliteReputationStore};
use reputation::model::{RebalanceDecision, RoundId};
use rounds::scoring::ScorePolicy;
use rounds::{ExecutorConfig, RoundExecutor};
use scheduler::{DryRunSink, ExecutorSink, JobsScheduler, LiveGate, SchedulerConfig, SinkError};

use cli::Cli;
use config::ValidatorConfig;

struct StubExecutorSink;

#[async_trait::async_trait]
impl ExecutorSink for StubExecutorSink {
    async fn submit(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
    ) -> Result<(), SinkError> {
        // TODO: wire the real on-chain executor adapter here:
        //   1. Translate decisions into vault rebalance transactions.
        //   2. Submit through the signer for this wallet identity.
        //   3. Map chain failures into SinkError::Unavailable so the gate
        //      retries them.
        tracing::info!(
            round_id = %round_id,
            decisions = decisions.len(),
            "executor adapter not wired; acknowledging handoff"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger("validator");
    let cli = Cli::parse();

    let config = ValidatorConfig::load(&cli.config)?;
    tracing::info!(
        wallet = %cli.wallet_name,
        network = %cli.network,
        netuid = cli.netuid,
        jobs = config.jobs.len(),
        miners = config.miners.len(),
        dry_run = cli.dry_run,
        "validator starting"
    );

    let store = Arc::new(SqliteReputationStore::new(&cli.db_url).await?);
    // upsert configured jobs so archived rounds always join to a job row
    for job in &config.jobs {
        store.save_job(job).await?;
    }

    let events = Arc::new(SqliteEventsSource::new(&cli.events_db_url).await?);
    let registry = Arc::new(StaticRegistry::new(config.miners.clone()));
    let transport = Arc::new(HttpMinerTransport::new(ValidatorIdentity {
        wallet_name: cli.wallet_name.clone(),
        network: cli.network.clone(),
        netuid: cli.netuid,
    })?);

    let executor_cfg = ExecutorConfig {
        miner_timeout: Duration::from_secs(cli.miner_timeout_secs),
        ..ExecutorConfig::default()
    };
    let executor = RoundExecutor::new(transport, Arc::clone(&events), executor_cfg);

    let live_gate = if cli.dry_run {
        LiveGate::start(Arc::clone(&store), Arc::new(DryRunSink))
    } else {
        LiveGate::start(Arc::clone(&store), Arc::new(StubExecutorSink))
    };

    let scheduler = Arc::new(JobsScheduler::new(
        executor,
        events,
        Arc::clone(&store),
        registry,
        live_gate,
        ScorePolicy { ema_on_violation: !cli.skip_violation_ema },
        SchedulerConfig {
            shutdown_grace: Duration::from_secs(cli.miner_timeout_secs),
            ..SchedulerConfig::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(config.jobs, shutdown_rx).await;
    tracing::info!("validator stopped");
    Ok(())
}
