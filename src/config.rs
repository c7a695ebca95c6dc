use crate::application::transfer::RetryPolicy;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input commands CSV file
    pub input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Attempts per transfer before a conflict is reported
    #[arg(long, env = "LEDGER_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// Backoff unit between attempts, in milliseconds
    #[arg(long, env = "LEDGER_BACKOFF_MS", default_value_t = 10)]
    pub backoff_ms: u64,

    /// Upper bound on a single transfer attempt, in milliseconds
    #[arg(long, env = "LEDGER_ATTEMPT_TIMEOUT_MS")]
    pub attempt_timeout_ms: Option<u64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LEDGER_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
        }
    }
}
