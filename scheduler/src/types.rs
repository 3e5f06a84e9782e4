//! Shared types used by the scheduler subsystem.

use std::time::Duration;

use chrono::Utc;

/// Configuration knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Multiplier on a job's `round_duration` giving the soft deadline for
    /// one round; beyond it the round is aborted and not archived.
    pub soft_deadline_factor: f64,

    /// How long an in-flight round may keep running after a shutdown
    /// signal before it is cancelled and its partial results discarded.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { soft_deadline_factor: 1.25, shutdown_grace: Duration::from_secs(60) }
    }
}

/// Current wall-clock time in UTC milliseconds.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
