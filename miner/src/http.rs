//! HTTP JSON transport: POSTs the rebalance query to the miner's registered
//! endpoint and decodes the response from the body.

use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{MinerTransport, TransportError};
use crate::types::{MinerInfo, RebalanceQuery, RebalanceResponse};

/// Coordinator identity attached to outbound queries so miners can
/// attribute and rate-limit callers.
#[derive(Debug, Clone)]
pub struct ValidatorIdentity {
    pub wallet_name: String,
    pub network: String,
    pub netuid: u16,
}

pub struct HttpMinerTransport {
    client: reqwest::Client,
    identity: ValidatorIdentity,
}

impl HttpMinerTransport {
    pub fn new(identity: ValidatorIdentity) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Ok(Self { client, identity })
    }
}

#[async_trait]
impl MinerTransport for HttpMinerTransport {
    async fn query(
        &self,
        miner: &MinerInfo,
        request: &RebalanceQuery,
        deadline: Duration,
    ) -> Result<RebalanceResponse, TransportError> {
        let response = self
            .client
            .post(&miner.endpoint)
            .timeout(deadline)
            .header("x-validator-wallet", &self.identity.wallet_name)
            .header("x-validator-network", &self.identity.network)
            .header("x-validator-netuid", self.identity.netuid.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Unreachable(format!(
                "miner {} returned status {status}",
                miner.miner_id
            )));
        }

        response
            .json::<RebalanceResponse>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
