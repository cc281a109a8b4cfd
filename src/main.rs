//! # TaskPilot Daemon
//!
//! Loads persisted account documents, connects remotes, and drives the
//! assistant scheduler until shutdown.
//!
//! Usage:
//!   taskpilotd                                 # Default data dir (~/.taskpilot/accounts)
//!   taskpilotd --data-dir /var/lib/taskpilot   # Custom data dir

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskpilot_runner::{AssistantSet, LogNotifier, Scheduler};
use taskpilot_store::Store;

/// Reserved document keys for subsystem state, never treated as accounts.
const SINGLETON_KEYS: [&str; 2] = ["notifier", "scheduler"];

#[derive(Parser)]
#[command(name = "taskpilotd", version, about = "⏰ TaskPilot — task automation daemon")]
struct Cli {
    /// Account data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "taskpilot=debug" } else { "taskpilot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(Store::default_dir);
    let store = Arc::new(Store::new(&data_dir, SINGLETON_KEYS)?);

    // Assistants ship in deployment-specific builds; the stock daemon
    // starts with an empty set and still serves the admin surfaces.
    let assistants = Arc::new(AssistantSet::new());
    if assistants.is_empty() {
        tracing::warn!("no assistants registered, accounts will only be loaded");
    }

    taskpilot_runner::load_accounts(&store, &assistants, &|_token| None)?;

    println!("⏰ TaskPilot v{}", env!("CARGO_PKG_VERSION"));
    println!("   📂 Data Dir:   {}", data_dir.display());
    println!("   👥 Accounts:   {}", store.accounts().len());
    println!("   🤖 Assistants: {}", assistants.len());
    println!();

    let scheduler = Scheduler::new(Arc::clone(&store), assistants, Arc::new(LogNotifier));
    let handle = scheduler.handle();
    let worker = std::thread::spawn(move || scheduler.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    handle.shutdown();
    if worker.join().is_err() {
        tracing::error!("scheduler worker panicked during shutdown");
    }

    Ok(())
}
