//! Miner discovery surface.
//!
//! Discovery itself is delegated to an external registry; the coordinator
//! only needs the current set of reachable miners at the start of a round.

use async_trait::async_trait;

use crate::types::MinerInfo;

#[async_trait]
pub trait MinerRegistry: Send + Sync {
    /// Snapshot of currently registered, reachable miners.
    async fn active_miners(&self) -> anyhow::Result<Vec<MinerInfo>>;
}

/// Fixed miner set from configuration.
pub struct StaticRegistry {
    miners: Vec<MinerInfo>,
}

impl StaticRegistry {
    pub fn new(miners: Vec<MinerInfo>) -> Self {
        Self { miners }
    }
}

#[async_trait]
impl MinerRegistry for StaticRegistry {
    async fn active_miners(&self) -> anyhow::Result<Vec<MinerInfo>> {
        Ok(self.miners.clone())
    }
}
