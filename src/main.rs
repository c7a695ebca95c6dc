use bankledger::application::engine::LedgerEngine;
use bankledger::application::transfer::TransferCoordinator;
use bankledger::config::Config;
use bankledger::domain::ports::LedgerStoreBox;
use bankledger::infrastructure::in_memory::InMemoryLedgerStore;
use bankledger::interfaces::csv::account_writer::AccountWriter;
use bankledger::interfaces::csv::command_reader::CommandReader;
use bankledger::logging::init_logging;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::Path;

fn open_store(config: &Config) -> Result<LedgerStoreBox> {
    match &config.db_path {
        Some(db_path) => open_persistent(db_path),
        None => Ok(Box::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(db_path: &Path) -> Result<LedgerStoreBox> {
    let store =
        bankledger::infrastructure::rocksdb::RocksDBStore::open(db_path).into_diagnostic()?;
    tracing::info!(path = %db_path.display(), "Using RocksDB storage");
    Ok(Box::new(store))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_db_path: &Path) -> Result<LedgerStoreBox> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(Box::new(InMemoryLedgerStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level);

    let store = open_store(&config)?;
    let engine = LedgerEngine::new(TransferCoordinator::with_policy(
        store,
        config.retry_policy(),
    ));

    // Process commands
    let file = File::open(&config.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = engine.process_command(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // Collect final state from engine
    let accounts = engine.into_results().await.into_diagnostic()?;

    // Output final state
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
