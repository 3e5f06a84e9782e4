//! Persistent reputation state: jobs, round archive, per-(miner, job)
//! scores, and the participation ledger behind live eligibility.

pub mod ema;
pub mod model;
pub mod store;

pub use model::{
    FinalPortfolio, Job, JobId, MinerScore, Prediction, RebalanceDecision, Round, RoundId,
    ScoreUpdate, Target,
};
pub use store::{sqlite_store::SqliteReputationStore, ReputationStore};
