use clap::Parser;
use std::path::PathBuf;

/// Fixed ledger parameters shared by every chain in the process
pub struct BlockchainConfig;

impl BlockchainConfig {
    /// Version recorded in every genesis block
    pub const VERSION: &'static str = "1.0.0";

    /// Divides the measured work time (microseconds) before it is scaled by the moved amount
    pub const CPU_COST_FACTOR: f64 = 100_000_000.0;

    /// Number of leading '0' hex digits a proof-of-work hash must carry
    pub const DIFFICULTY: usize = 4;

    /// Sender of every newly minted coin
    pub const MINT_ADDRESS: &'static str = "00";

    /// Internal chain that collects mining and transfer fees
    pub const NODE_OPERATOR: &'static str = "o";
}

/// Runtime configuration of a node
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct NodeConfig {
    /// Namespace grouping every chain hosted by this node
    #[arg(short, long, default_value = "My Circle")]
    pub namespace: String,

    /// Address the HTTP server binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the chain database
    #[arg(long, default_value = "data/chains")]
    pub data_dir: PathBuf,

    /// Leading zero hex digits required by proof-of-work
    #[arg(long, default_value_t = BlockchainConfig::DIFFICULTY)]
    pub difficulty: usize,

    /// Coins minted by one mining request when the caller names no amount
    #[arg(long, default_value_t = 50.0)]
    pub mining_reward: f64,

    /// Wipe and recreate every chain on this period (seconds)
    #[arg(long)]
    pub reset_interval_secs: Option<u64>,
}

impl NodeConfig {
    /// Checks values clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.is_empty() {
            return Err("Namespace can't be empty".to_string());
        }
        if self.namespace.contains('>') {
            return Err("Namespace can't contain '>'".to_string());
        }
        if self.difficulty > 64 {
            return Err(format!("Difficulty {} exceeds the hash length", self.difficulty));
        }
        if !self.mining_reward.is_finite() || self.mining_reward <= 0.0 {
            return Err(format!("Invalid mining reward: {}", self.mining_reward));
        }
        if self.reset_interval_secs == Some(0) {
            return Err("Reset interval must be positive".to_string());
        }
        Ok(())
    }
}
