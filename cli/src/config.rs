use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use miner::types::MinerInfo;
use reputation::model::Job;

/// On-disk validator configuration: the managed jobs and the static miner
/// registry.
#[derive(Debug, Deserialize)]
pub struct ValidatorConfig {
    pub jobs: Vec<Job>,
    pub miners: Vec<MinerInfo>,
}

impl ValidatorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ValidatorConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;

        if config.jobs.is_empty() {
            anyhow::bail!("config declares no jobs");
        }
        Ok(config)
    }
}
