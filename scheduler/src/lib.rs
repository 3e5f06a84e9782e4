//! Job scheduling: one independent round loop per managed vault/pair,
//! alternating evaluation and live rounds, plus the gate that hands winning
//! live decisions to the external executor.

pub mod engine;
pub mod live;
pub mod types;

pub use engine::JobsScheduler;
pub use live::{DryRunSink, ExecutorSink, LiveGate, SinkError};
pub use types::SchedulerConfig;
