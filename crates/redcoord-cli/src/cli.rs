use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "redcoord")]
#[command(about = "Distributed locks and cache invalidation over Redis")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./redcoord.toml when present)
    #[arg(short, long, global = true, env = "REDCOORD_CONFIG")]
    pub config: Option<String>,

    /// Redis URL (overrides the configured one)
    #[arg(short, long, global = true, env = "REDCOORD_URL")]
    pub url: Option<String>,

    /// Key prefix for the invalidation channel and history
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Log level filter (overrides the configured one; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire a lock, hold it, then release it
    Lock(LockArgs),
    /// Broadcast cache invalidation for keys
    Invalidate(InvalidateArgs),
    /// List recently invalidated keys
    History(HistoryArgs),
    /// Subscribe to invalidations and print evicted keys until Ctrl+C
    Watch(WatchArgs),
    /// Check that the store is reachable
    Ping,
}

#[derive(clap::Args)]
pub struct LockArgs {
    /// Lock key
    pub key: String,
    /// Give up after this many milliseconds (0 waits indefinitely)
    #[arg(short, long, default_value_t = 5000)]
    pub timeout_ms: u64,
    /// Hold ceiling in milliseconds (defaults to the configured one)
    #[arg(long)]
    pub max_hold_ms: Option<u64>,
    /// How long to hold before releasing; without it the lock is held until Ctrl+C
    #[arg(long)]
    pub hold_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Cache keys to invalidate
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(clap::Args)]
pub struct HistoryArgs {
    /// Look back this many seconds (defaults to the retention window)
    #[arg(short, long)]
    pub since_secs: Option<u64>,
}

#[derive(clap::Args)]
pub struct WatchArgs {
    /// Subscriber name
    #[arg(short, long, default_value = "redcoord-cli")]
    pub name: String,
    /// Re-read the configuration file this often and follow URL changes
    #[arg(long, default_value_t = 5)]
    pub reload_secs: u64,
}
