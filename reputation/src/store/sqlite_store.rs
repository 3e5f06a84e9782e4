//! SqliteReputationStore
//! ----------------------
//! SQLite-backed implementation of the `ReputationStore` trait. It is
//! responsible for everything the coordinator must not lose across
//! restarts:
//!
//!  - job definitions (upserted from config at startup)
//!  - the append-only round archive with per-miner predictions
//!  - per-(miner, job) score EMAs
//!  - the daily participation ledger behind live eligibility
//!  - live-execution records that make executor handoff idempotent
//!
//! Score updates for one job are serialized behind a per-job async mutex;
//! jobs never contend with each other.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use super::ReputationStore;
use crate::ema;
use crate::model::{
    FinalPortfolio, Job, MinerScore, Prediction, RebalanceDecision, Round, RoundId, ScoreUpdate,
    Target,
};
use miner::types::{Constraints, MinerId, RoundType};
use pool::types::{Inventory, Position};

pub struct SqliteReputationStore {
    pool: SqlitePool,
    job_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SqliteReputationStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool, job_locks: Mutex::new(HashMap::new()) }
    }

    /// Open (or create) the store and ensure the schema exists.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = url.parse::<SqliteConnectOptions>()?.create_if_missing(true);
        // in-memory SQLite is per-connection; a wider pool would hand each
        // query a different empty database
        let mut pool_options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            pool_options = pool_options.max_connections(1);
        }
        let pool = pool_options.connect_with(options).await?;

        let schema = [
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                pair_address TEXT NOT NULL,
                vault_address TEXT NOT NULL,
                chain_id INTEGER NOT NULL,
                fee_tier INTEGER NOT NULL,
                round_duration_secs INTEGER NOT NULL,
                checkpoint_interval INTEGER NOT NULL,
                round_blocks INTEGER NOT NULL,
                target TEXT NOT NULL,
                active INTEGER NOT NULL,
                constraints_json TEXT NOT NULL,
                seed_inventory_json TEXT NOT NULL
            );
        "#,
            r#"
            CREATE TABLE IF NOT EXISTS rounds (
                round_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                round_type TEXT NOT NULL,
                start_block INTEGER NOT NULL,
                end_block INTEGER NOT NULL,
                started_at_ms INTEGER NOT NULL,
                finished_at_ms INTEGER,
                constraints_json TEXT NOT NULL,
                initial_inventory_json TEXT NOT NULL,
                initial_positions_json TEXT NOT NULL
            );
        "#,
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                round_id TEXT NOT NULL,
                miner_id TEXT NOT NULL,
                accepted INTEGER NOT NULL,
                responded INTEGER NOT NULL,
                violation TEXT,
                raw_score REAL,
                normalized_rank REAL,
                final_portfolio_json TEXT NOT NULL,
                decisions_json TEXT NOT NULL,
                PRIMARY KEY (round_id, miner_id)
            );
        "#,
            r#"
            CREATE TABLE IF NOT EXISTS miner_scores (
                miner_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                eval_ema REAL,
                live_ema REAL,
                combined REAL NOT NULL,
                last_eval_at_ms INTEGER,
                last_live_at_ms INTEGER,
                PRIMARY KEY (miner_id, job_id)
            );
        "#,
            r#"
            CREATE TABLE IF NOT EXISTS participation (
                miner_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                utc_date TEXT NOT NULL,
                PRIMARY KEY (miner_id, job_id, utc_date)
            );
        "#,
            r#"
            CREATE TABLE IF NOT EXISTS live_executions (
                round_id TEXT PRIMARY KEY,
                decisions_json TEXT NOT NULL,
                submitted_at_ms INTEGER NOT NULL
            );
        "#,
        ];
        for statement in schema {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool, job_locks: Mutex::new(HashMap::new()) })
    }

    async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.job_locks.lock().await;
        locks.entry(job_id.to_string()).or_default().clone()
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Job> {
    let target_str: String = row.get("target");
    let constraints_json: String = row.get("constraints_json");
    let seed_inventory_json: String = row.get("seed_inventory_json");

    Ok(Job {
        job_id: row.get("job_id"),
        pair_address: row.get("pair_address"),
        vault_address: row.get("vault_address"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        fee_tier: row.get::<i64, _>("fee_tier") as u32,
        round_duration_secs: row.get::<i64, _>("round_duration_secs") as u64,
        checkpoint_interval: row.get::<i64, _>("checkpoint_interval") as u64,
        round_blocks: row.get::<i64, _>("round_blocks") as u64,
        target: Target::from_str(&target_str)?,
        active: row.get::<i64, _>("active") != 0,
        constraints: serde_json::from_str::<Constraints>(&constraints_json)?,
        seed_inventory: serde_json::from_str::<Inventory>(&seed_inventory_json)?,
    })
}

fn row_to_round(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Round> {
    let round_id_str: String = row.get("round_id");
    let round_type_str: String = row.get("round_type");
    let constraints_json: String = row.get("constraints_json");
    let inventory_json: String = row.get("initial_inventory_json");
    let positions_json: String = row.get("initial_positions_json");

    Ok(Round {
        round_id: uuid::Uuid::parse_str(&round_id_str)?,
        job_id: row.get("job_id"),
        round_type: RoundType::from_str(&round_type_str)?,
        start_block: row.get::<i64, _>("start_block") as u64,
        end_block: row.get::<i64, _>("end_block") as u64,
        started_at_ms: row.get::<i64, _>("started_at_ms") as u64,
        finished_at_ms: row.get::<Option<i64>, _>("finished_at_ms").map(|v| v as u64),
        constraints: serde_json::from_str::<Constraints>(&constraints_json)?,
        initial_inventory: serde_json::from_str::<Inventory>(&inventory_json)?,
        initial_positions: serde_json::from_str::<Vec<Position>>(&positions_json)?,
    })
}

fn row_to_prediction(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Prediction> {
    let round_id_str: String = row.get("round_id");
    let portfolio_json: String = row.get("final_portfolio_json");
    let decisions_json: String = row.get("decisions_json");

    Ok(Prediction {
        round_id: uuid::Uuid::parse_str(&round_id_str)?,
        miner_id: row.get("miner_id"),
        accepted: row.get::<i64, _>("accepted") != 0,
        responded: row.get::<i64, _>("responded") != 0,
        violation: row.get("violation"),
        raw_score: row.get("raw_score"),
        normalized_rank: row.get("normalized_rank"),
        final_portfolio: serde_json::from_str::<FinalPortfolio>(&portfolio_json)?,
        decisions: serde_json::from_str::<Vec<RebalanceDecision>>(&decisions_json)?,
    })
}

fn row_to_score(row: &sqlx::sqlite::SqliteRow) -> MinerScore {
    MinerScore {
        miner_id: row.get("miner_id"),
        job_id: row.get("job_id"),
        eval_ema: row.get("eval_ema"),
        live_ema: row.get("live_ema"),
        combined: row.get("combined"),
        last_eval_at_ms: row.get::<Option<i64>, _>("last_eval_at_ms").map(|v| v as u64),
        last_live_at_ms: row.get::<Option<i64>, _>("last_live_at_ms").map(|v| v as u64),
    }
}

#[async_trait]
impl ReputationStore for SqliteReputationStore {
    async fn load_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY job_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, pair_address, vault_address, chain_id, fee_tier,
                round_duration_secs, checkpoint_interval, round_blocks,
                target, active, constraints_json, seed_inventory_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                pair_address = excluded.pair_address,
                vault_address = excluded.vault_address,
                chain_id = excluded.chain_id,
                fee_tier = excluded.fee_tier,
                round_duration_secs = excluded.round_duration_secs,
                checkpoint_interval = excluded.checkpoint_interval,
                round_blocks = excluded.round_blocks,
                target = excluded.target,
                active = excluded.active,
                constraints_json = excluded.constraints_json,
                seed_inventory_json = excluded.seed_inventory_json;
        "#,
        )
        .bind(&job.job_id)
        .bind(&job.pair_address)
        .bind(&job.vault_address)
        .bind(job.chain_id as i64)
        .bind(job.fee_tier as i64)
        .bind(job.round_duration_secs as i64)
        .bind(job.checkpoint_interval as i64)
        .bind(job.round_blocks as i64)
        .bind(job.target.to_string())
        .bind(job.active as i64)
        .bind(serde_json::to_string(&job.constraints)?)
        .bind(serde_json::to_string(&job.seed_inventory)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_scores(&self, job_id: &str) -> anyhow::Result<Vec<MinerScore>> {
        let rows = sqlx::query("SELECT * FROM miner_scores WHERE job_id = ? ORDER BY miner_id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_score).collect())
    }

    async fn update_scores(
        &self,
        job_id: &str,
        updates: &[ScoreUpdate],
        now_ms: u64,
    ) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let lock = self.job_lock(job_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        for update in updates {
            let existing = sqlx::query(
                "SELECT eval_ema, live_ema, last_eval_at_ms, last_live_at_ms
                 FROM miner_scores WHERE miner_id = ? AND job_id = ?",
            )
            .bind(&update.miner_id)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

            let (mut eval_ema, mut live_ema, mut last_eval, mut last_live) = match &existing {
                Some(row) => (
                    row.get::<Option<f64>, _>("eval_ema"),
                    row.get::<Option<f64>, _>("live_ema"),
                    row.get::<Option<i64>, _>("last_eval_at_ms"),
                    row.get::<Option<i64>, _>("last_live_at_ms"),
                ),
                None => (None, None, None, None),
            };

            match update.round_type {
                RoundType::Eval => {
                    eval_ema = Some(ema::blend(eval_ema, update.score, ema::EVAL_ALPHA));
                    last_eval = Some(now_ms as i64);
                }
                RoundType::Live => {
                    live_ema = Some(ema::blend(live_ema, update.score, ema::LIVE_ALPHA));
                    last_live = Some(now_ms as i64);
                }
            }

            sqlx::query(
                r#"
                INSERT INTO miner_scores (
                    miner_id, job_id, eval_ema, live_ema, combined,
                    last_eval_at_ms, last_live_at_ms
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(miner_id, job_id) DO UPDATE SET
                    eval_ema = excluded.eval_ema,
                    live_ema = excluded.live_ema,
                    combined = excluded.combined,
                    last_eval_at_ms = excluded.last_eval_at_ms,
                    last_live_at_ms = excluded.last_live_at_ms;
            "#,
            )
            .bind(&update.miner_id)
            .bind(job_id)
            .bind(eval_ema)
            .bind(live_ema)
            .bind(ema::combined(eval_ema, live_ema))
            .bind(last_eval)
            .bind(last_live)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn record_participation(
        &self,
        miner_id: &str,
        job_id: &str,
        utc_date: NaiveDate,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO participation (miner_id, job_id, utc_date) VALUES (?, ?, ?)",
        )
        .bind(miner_id)
        .bind(job_id)
        .bind(utc_date.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn archive_round(
        &self,
        round: &Round,
        predictions: &[Prediction],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO rounds (
                round_id, job_id, round_type, start_block, end_block,
                started_at_ms, finished_at_ms, constraints_json,
                initial_inventory_json, initial_positions_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(round.round_id.to_string())
        .bind(&round.job_id)
        .bind(round.round_type.to_string())
        .bind(round.start_block as i64)
        .bind(round.end_block as i64)
        .bind(round.started_at_ms as i64)
        .bind(round.finished_at_ms.map(|v| v as i64))
        .bind(serde_json::to_string(&round.constraints)?)
        .bind(serde_json::to_string(&round.initial_inventory)?)
        .bind(serde_json::to_string(&round.initial_positions)?)
        .execute(&mut *tx)
        .await?;

        for prediction in predictions {
            sqlx::query(
                r#"
                INSERT INTO predictions (
                    round_id, miner_id, accepted, responded, violation,
                    raw_score, normalized_rank, final_portfolio_json, decisions_json
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(prediction.round_id.to_string())
            .bind(&prediction.miner_id)
            .bind(prediction.accepted as i64)
            .bind(prediction.responded as i64)
            .bind(&prediction.violation)
            .bind(prediction.raw_score)
            .bind(prediction.normalized_rank)
            .bind(serde_json::to_string(&prediction.final_portfolio)?)
            .bind(serde_json::to_string(&prediction.decisions)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_round(
        &self,
        round_id: RoundId,
    ) -> anyhow::Result<Option<(Round, Vec<Prediction>)>> {
        let row = sqlx::query("SELECT * FROM rounds WHERE round_id = ?")
            .bind(round_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let round = row_to_round(&row)?;

        let prediction_rows =
            sqlx::query("SELECT * FROM predictions WHERE round_id = ? ORDER BY miner_id")
                .bind(round_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        let predictions = prediction_rows
            .iter()
            .map(row_to_prediction)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some((round, predictions)))
    }

    async fn list_eligible(
        &self,
        job_id: &str,
        as_of: NaiveDate,
    ) -> anyhow::Result<Vec<MinerId>> {
        let mut dates = Vec::with_capacity(7);
        for back in 0..7u64 {
            let day = as_of
                .checked_sub_days(chrono::Days::new(back))
                .ok_or_else(|| anyhow::anyhow!("eligibility window underflows calendar"))?;
            dates.push(day.to_string());
        }

        let mut query = sqlx::query(
            r#"
            SELECT miner_id FROM participation
            WHERE job_id = ? AND utc_date IN (?, ?, ?, ?, ?, ?, ?)
            GROUP BY miner_id
            HAVING COUNT(DISTINCT utc_date) = 7
            ORDER BY miner_id
        "#,
        )
        .bind(job_id);
        for date in &dates {
            query = query.bind(date);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("miner_id")).collect())
    }

    async fn live_execution_recorded(&self, round_id: RoundId) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT round_id FROM live_executions WHERE round_id = ?")
            .bind(round_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn record_live_execution(
        &self,
        round_id: RoundId,
        decisions: &[RebalanceDecision],
        now_ms: u64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO live_executions (round_id, decisions_json, submitted_at_ms)
             VALUES (?, ?, ?)",
        )
        .bind(round_id.to_string())
        .bind(serde_json::to_string(decisions)?)
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
