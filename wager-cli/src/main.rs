mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wager_core::{EngineConfig, SqliteLedger, WagerError};

#[derive(Parser)]
#[command(name = "wager")]
#[command(about = "Timed multi-player wagering games")]
#[command(version)]
struct Cli {
    /// Data directory for the ledger database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Account deposits and balances
    #[command(subcommand)]
    Account(commands::AccountCommands),

    /// Run, list and inspect games
    #[command(subcommand)]
    Game(commands::GameCommands),

    /// Close games left running by an earlier process and release their stakes
    Recover,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = CliConfig::new(cli.data_dir, cli.verbose);

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::fs::create_dir_all(&config.data_dir).await?;
    tracing::debug!("Using data directory {}", config.data_dir.display());

    let engine = EngineConfig::from_env()?;
    let ledger =
        Arc::new(SqliteLedger::open(&config.database_path(), engine.ledger.clone()).await?);

    let result = match cli.command {
        Commands::Account(cmd) => commands::handle_account_command(cmd, &ledger).await,
        Commands::Game(cmd) => {
            commands::handle_game_command(cmd, Arc::clone(&ledger), &engine).await
        }
        Commands::Recover => match ledger.recover_interrupted_games().await {
            Ok(count) => {
                println!("Closed {} interrupted games", count);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        match e.downcast_ref::<WagerError>() {
            Some(WagerError::InsufficientFunds { need, available }) => {
                eprintln!("Error: Insufficient funds");
                eprintln!(
                    "Need: {}, Available: {}",
                    wager_core::from_nano(*need as i64),
                    wager_core::from_nano(*available)
                );
                eprintln!("Use 'wager account deposit' to add funds");
            }
            Some(WagerError::GameNotFound(id)) => {
                eprintln!("Error: Game '{}' not found", id);
                eprintln!("Use 'wager game list' to see active games");
            }
            Some(WagerError::Config(msg)) => {
                eprintln!("Error: {}", msg);
                eprintln!("Pass --no-limits to run outside the default limits");
            }
            Some(other) => {
                eprintln!("Error: {}", other);
            }
            None => {
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
