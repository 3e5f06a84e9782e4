//! Miner-facing surface: the rebalance wire protocol, the transport
//! abstraction used to reach miners, and the registry that names them.

pub mod http;
pub mod registry;
pub mod transport;
pub mod types;

pub use registry::{MinerRegistry, StaticRegistry};
pub use transport::{MinerTransport, TransportError};
pub use types::{
    Constraints, MinerId, MinerInfo, MinerMetadata, RebalanceQuery, RebalanceResponse, RoundType,
};
