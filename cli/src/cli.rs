use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "validator", version)]
pub struct Cli {
    /// Jobs and miner registry configuration (JSON)
    #[clap(long, default_value = "validator.json")]
    pub config: PathBuf,

    /// Mutable reputation & jobs store
    #[clap(long, default_value = "sqlite://validator.db")]
    pub db_url: String,

    /// Read-only pool events store
    #[clap(long, default_value = "sqlite://events.db")]
    pub events_db_url: String,

    /// Wallet identity presented to miners
    #[clap(long, default_value = "default")]
    pub wallet_name: String,

    /// Network identity presented to miners
    #[clap(long, default_value = "mainnet")]
    pub network: String,

    /// Subnet id
    #[clap(long, default_value = "0")]
    pub netuid: u16,

    /// Hard deadline for each miner query, in seconds
    #[clap(long, default_value = "60")]
    pub miner_timeout_secs: u64,

    /// Do not fold violation zeros into the EMA (refusal-like treatment)
    #[clap(long)]
    pub skip_violation_ema: bool,

    /// Suppress executor-sink emission and any on-chain side effects
    #[clap(long)]
    pub dry_run: bool,
}
