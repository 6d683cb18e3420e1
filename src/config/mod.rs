use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Bitcoin network the node runs on; selects the macaroon path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel isolator configuration.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Path to the node directory
    #[arg(long, default_value = "/data/lnd", env = "CHANNEL_ISOLATOR_NODE_DIR")]
    pub node_dir: PathBuf,

    /// Bitcoin network
    #[arg(long, default_value = "mainnet", env = "CHANNEL_ISOLATOR_NETWORK")]
    pub network: Network,

    /// Path to the isolation database (default: ~/channel_isolator/channel_isolator.db)
    #[arg(long, env = "CHANNEL_ISOLATOR_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Node gRPC endpoint
    #[arg(
        long,
        default_value = "https://localhost:10009",
        env = "CHANNEL_ISOLATOR_NODE_ENDPOINT"
    )]
    pub node_endpoint: String,

    /// How often to poll the database for rule changes made by other
    /// processes, in milliseconds
    #[arg(long, default_value = "500", env = "CHANNEL_ISOLATOR_WATCH_INTERVAL_MS")]
    pub watch_interval_ms: u64,

    /// Attempt queue capacity; overflow drops the oldest pending record
    #[arg(long, default_value = "1024", env = "CHANNEL_ISOLATOR_ATTEMPT_QUEUE")]
    pub attempt_queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Config {
    /// Resolved database path, defaulting under the home directory.
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }

    /// Store poll interval as a Duration.
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

fn default_db_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("channel_isolator")
        .join("channel_isolator.db")
}

/// Top-level command line: global configuration plus one subcommand.
#[derive(Debug, Parser)]
#[command(name = "channel-isolator")]
#[command(about = "Per-channel HTLC isolation for an LND node", version)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the interceptor daemon
    Run,

    /// Start isolating a channel
    Isolate {
        channel_id: u64,
        /// Channel alias for reference
        #[arg(long)]
        alias: Option<String>,
    },

    /// Stop isolating a channel
    Stop { channel_id: u64 },

    /// Allow an incoming channel to forward into an isolated channel
    AddException {
        isolated_channel: u64,
        allowed_channel: u64,
        /// Allowed channel alias
        #[arg(long)]
        alias: Option<String>,
    },

    /// Withdraw an allowed incoming channel
    RemoveException {
        isolated_channel: u64,
        allowed_channel: u64,
    },

    /// List currently isolated channels
    List,

    /// Show exceptions for the active session on a channel
    Exceptions { channel_id: u64 },

    /// Show isolation history
    History {
        /// Filter by channel id
        #[arg(long)]
        channel: Option<u64>,
    },

    /// Show recorded attempts for a session, most recent first
    Attempts {
        session_id: i64,
        /// Maximum rows to print
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Show overall counters
    Stats,
}
