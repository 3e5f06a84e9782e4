mod mocks;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use events::MemoryEventsSource;
use miner::registry::StaticRegistry;
use miner::types::{Constraints, MinerInfo, RoundType};
use pool::math;
use pool::types::{Inventory, PoolEvent, PoolEventKind};
use reputation::model::{Job, Target};
use rounds::scoring::ScorePolicy;
use rounds::{ExecutorConfig, RoundExecutor};
use scheduler::{JobsScheduler, LiveGate, SchedulerConfig};

use mocks::{CollectingSink, HoldTransport, MockStore};

const PAIR: &str = "a1b2c3";
const X96: f64 = 79228162514264337593543950336.0;

fn swap(block: u64, price: f64) -> PoolEvent {
    PoolEvent {
        block_number: block,
        log_index: 0,
        kind: PoolEventKind::Swap {
            amount0_delta: 0,
            amount1_delta: 0,
            sqrt_price_x96: (price.sqrt() * X96) as u128,
            new_tick: math::tick_of_price(price),
        },
    }
}

fn job() -> Job {
    Job {
        job_id: "job-1".to_string(),
        pair_address: PAIR.to_string(),
        vault_address: "0xvault".to_string(),
        chain_id: 8453,
        fee_tier: 3000,
        round_duration_secs: 1,
        checkpoint_interval: 20,
        round_blocks: 40,
        target: Target::Pol,
        active: true,
        constraints: Constraints { max_il: 0.5, min_tick_width: 10, max_rebalances: 4 },
        seed_inventory: Inventory::new(1_000, 2_000),
    }
}

fn miners(ids: &[&str]) -> Vec<MinerInfo> {
    ids.iter()
        .map(|id| MinerInfo {
            miner_id: id.to_string(),
            endpoint: format!("http://127.0.0.1:9000/{id}"),
        })
        .collect()
}

struct Harness {
    scheduler: Arc<JobsScheduler<HoldTransport, MemoryEventsSource, MockStore, StaticRegistry>>,
    store: Arc<MockStore>,
    sink: Arc<CollectingSink>,
}

async fn harness(miner_ids: &[&str]) -> Harness {
    let events = Arc::new(MemoryEventsSource::new());
    // price history before the window, plus the anchor block
    events.push_event(PAIR, swap(5, 1.0)).await;
    events.push_event(PAIR, swap(50, 1.0)).await;

    let store = Arc::new(MockStore::default());
    let sink = Arc::new(CollectingSink::default());
    let registry = Arc::new(StaticRegistry::new(miners(miner_ids)));
    let transport = Arc::new(HoldTransport);

    let executor_cfg = ExecutorConfig {
        miner_timeout: Duration::from_secs(5),
        events_backoff: Duration::from_millis(1),
        ..ExecutorConfig::default()
    };
    let executor = RoundExecutor::new(transport, Arc::clone(&events), executor_cfg);

    let scheduler = Arc::new(JobsScheduler::new(
        executor,
        events,
        Arc::clone(&store),
        registry,
        LiveGate::start(Arc::clone(&store), Arc::clone(&sink)),
        ScorePolicy::default(),
        SchedulerConfig { shutdown_grace: Duration::from_millis(200), ..SchedulerConfig::default() },
    ));

    Harness { scheduler, store, sink }
}

/// Poll until the live gate worker has drained, bounded by `deadline`.
async fn wait_for_submissions(sink: &CollectingSink, expected: usize, deadline: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        if sink.submitted.lock().await.len() >= expected || start.elapsed() > deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn eval_tick_archives_scores_and_participation() {
    let h = harness(&["m1", "m2"]).await;
    let job = job();

    let winner = h.scheduler.on_tick(&job, None).await;
    // identical holds tie; the tie breaks toward the lower miner id
    assert_eq!(winner.as_deref(), Some("m1"));

    let archived = h.store.archived.lock().await;
    assert_eq!(archived.len(), 1);
    let (round, predictions) = &archived[0];
    assert_eq!(round.round_type, RoundType::Eval);
    assert_eq!((round.start_block, round.end_block), (10, 50));
    assert!(round.finished_at_ms.is_some());
    assert_eq!(predictions.len(), 2);

    let updates = h.store.updates.lock().await;
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|(job_id, u)| job_id == "job-1" && u.round_type == RoundType::Eval));

    let today = Utc::now().date_naive();
    let participation = h.store.participation.lock().await;
    assert!(participation.contains(&("m1".to_string(), "job-1".to_string(), today)));
    assert!(participation.contains(&("m2".to_string(), "job-1".to_string(), today)));

    assert!(h.sink.submitted.lock().await.is_empty(), "eval rounds never reach the executor");
}

#[tokio::test]
async fn eligible_winner_gets_a_live_round() {
    let h = harness(&["m1", "m2"]).await;
    h.store.eligible.lock().await.push("m1".to_string());
    let job = job();

    h.scheduler.on_tick(&job, Some("m1".to_string())).await;

    let (live_round_id, live_len) = {
        let archived = h.store.archived.lock().await;
        assert_eq!(archived.len(), 2, "eval and live rounds both archived");
        let (live_round, live_predictions) =
            archived.iter().find(|(r, _)| r.round_type == RoundType::Live).expect("live round");
        assert_eq!(live_predictions.len(), 1);
        assert_eq!(live_predictions[0].miner_id, "m1");
        (live_round.round_id, live_predictions[0].decisions.len())
    };

    let live_updates: usize = h
        .store
        .updates
        .lock()
        .await
        .iter()
        .filter(|(_, u)| u.round_type == RoundType::Live)
        .count();
    assert_eq!(live_updates, 1);

    wait_for_submissions(&h.sink, 1, Duration::from_secs(2)).await;
    let submitted = h.sink.submitted.lock().await;
    assert_eq!(submitted.as_slice(), &[(live_round_id, live_len)]);
    assert!(h.store.live_recorded.lock().await.contains(&live_round_id));
}

#[tokio::test]
async fn ineligible_winner_stays_in_evaluation() {
    let h = harness(&["m1", "m2"]).await;
    let job = job();

    h.scheduler.on_tick(&job, Some("m1".to_string())).await;

    assert_eq!(h.store.archived.lock().await.len(), 1);
    assert!(h.sink.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn deregistered_winner_is_not_promoted() {
    let h = harness(&["m2"]).await;
    h.store.eligible.lock().await.push("m1".to_string());
    let job = job();

    h.scheduler.on_tick(&job, Some("m1".to_string())).await;

    assert_eq!(h.store.archived.lock().await.len(), 1);
}

#[tokio::test]
async fn empty_registry_skips_the_tick() {
    let h = harness(&[]).await;
    let job = job();

    assert_eq!(h.scheduler.on_tick(&job, None).await, None);
    assert!(h.store.archived.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn live_gate_retries_a_flaky_sink() {
    let store = Arc::new(MockStore::default());
    let sink = Arc::new(CollectingSink::default());
    sink.fail_first.store(2, std::sync::atomic::Ordering::SeqCst);

    let gate = LiveGate::start(Arc::clone(&store), Arc::clone(&sink));
    let round_id = uuid::Uuid::new_v4();
    gate.enqueue(round_id, vec![]);

    // two failures back off 1s + 2s before the third attempt lands
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sink.submitted.lock().await.as_slice(), &[(round_id, 0)]);
    assert!(store.live_recorded.lock().await.contains(&round_id));
}

#[tokio::test]
async fn delivered_rounds_are_not_resubmitted() {
    let store = Arc::new(MockStore::default());
    let sink = Arc::new(CollectingSink::default());
    let round_id = uuid::Uuid::new_v4();
    store.live_recorded.lock().await.insert(round_id);

    let gate = LiveGate::start(Arc::clone(&store), Arc::clone(&sink));
    gate.enqueue(round_id, vec![]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(sink.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn shutdown_stops_job_loops_promptly() {
    let h = harness(&["m1"]).await;
    let (tx, rx) = watch::channel(false);
    tx.send(true).expect("receiver alive");

    let run = Arc::clone(&h.scheduler).run(vec![job()], rx);
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("scheduler must exit promptly on shutdown");
}
