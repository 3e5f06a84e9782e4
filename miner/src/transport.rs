//! Transport abstraction for the unary miner call.
//!
//! The coordinator only needs "send this query to that miner and get an
//! answer within the deadline"; whether that rides HTTP, an RPC mesh, or an
//! in-process mock is an implementation concern behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{MinerInfo, RebalanceQuery, RebalanceResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("miner query timed out")]
    Timeout,

    #[error("miner unreachable: {0}")]
    Unreachable(String),

    /// The miner answered, but not with a decodable response.
    #[error("malformed miner response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MinerTransport: Send + Sync {
    /// Issue one rebalance query with a hard deadline.
    ///
    /// An explicit refusal is a successful response (`accepted = false`),
    /// not an error. Timeouts and transport failures are non-fatal for the
    /// round; the caller decides how many to tolerate.
    async fn query(
        &self,
        miner: &MinerInfo,
        request: &RebalanceQuery,
        deadline: Duration,
    ) -> Result<RebalanceResponse, TransportError>;
}
