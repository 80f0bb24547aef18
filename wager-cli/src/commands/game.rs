use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wager_core::{
    from_nano, Choice, EngineConfig, Game, GameRecord, GameSettings, GameType, HighLowConfig,
    HighLowGame, Ledger, Player, PlayerChoiceEvent, PlayerEvent, RockPaperScissorsGame,
    SessionRuntime, SqliteLedger,
};

#[derive(Subcommand)]
pub enum GameCommands {
    /// Run a high-low game until it ends
    HighLow {
        /// Creating account
        #[arg(long)]
        creator: String,
        /// Account joining after the start (repeatable)
        #[arg(long = "join")]
        joiners: Vec<String>,
        /// Stake per player in whole units
        #[arg(long, default_value_t = 1.0)]
        cost: f64,
        /// Maximum number of players, creator included
        #[arg(long, default_value_t = 2)]
        players: u8,
        /// Game duration in seconds
        #[arg(long, default_value_t = 30)]
        duration: u64,
        /// Exclusive upper bound of every draw
        #[arg(long, default_value_t = 100)]
        max_random: u32,
        /// Skip the product limits on cost, players, duration and range
        #[arg(long)]
        no_limits: bool,
    },
    /// Run a rock-paper-scissors game until it ends
    Rps {
        /// Creating account and its choice, as `id:choice`
        #[arg(long)]
        creator: String,
        /// Joining account and its choice, as `id:choice` (repeatable)
        #[arg(long = "join")]
        joiners: Vec<String>,
        /// Stake per player in whole units
        #[arg(long, default_value_t = 1.0)]
        cost: f64,
        /// Maximum number of players, creator included
        #[arg(long, default_value_t = 2)]
        players: u8,
        /// Game duration in seconds
        #[arg(long, default_value_t = 30)]
        duration: u64,
        /// Skip the product limits on cost, players and duration
        #[arg(long)]
        no_limits: bool,
    },
    /// List games that are created or running
    List {
        /// Only games of this type (high-low, rps)
        #[arg(long = "type")]
        game_type: Option<String>,
    },
    /// Show a game and its history
    Show {
        /// Game ID
        id: String,
    },
}

pub async fn handle_game_command(
    cmd: GameCommands,
    ledger: Arc<SqliteLedger>,
    engine: &EngineConfig,
) -> Result<()> {
    match cmd {
        GameCommands::HighLow {
            creator,
            joiners,
            cost,
            players,
            duration,
            max_random,
            no_limits,
        } => {
            let config = HighLowConfig {
                settings: settings(cost, players, duration),
                max_random,
            };
            if !no_limits {
                engine.limits.check_high_low(&config)?;
            }

            let game: Arc<dyn Game> = Arc::new(HighLowGame::with_buffer(
                config,
                Player::new(creator),
                engine.event_buffer,
            )?);

            let runtime = SessionRuntime::new(Arc::clone(&ledger) as Arc<dyn Ledger>);
            runtime.subscribe(Arc::clone(&game)).await?;
            println!("Started high-low game {}", game.id());

            for joiner in joiners {
                let player = Player::new(joiner);
                match runtime.join_game(&game, player.clone()).await {
                    Ok(_) => println!("  {} joined", player),
                    Err(e) => println!("  {} could not join: {}", player, e),
                }
            }

            wait_for_end(&runtime, game.as_ref()).await;
            print_record(&ledger.game(game.id(), true).await?);
        }

        GameCommands::Rps {
            creator,
            joiners,
            cost,
            players,
            duration,
            no_limits,
        } => {
            let config = settings(cost, players, duration);
            if !no_limits {
                engine.limits.check_settings(&config)?;
            }

            let creator = choice_action(&creator)?;
            let game: Arc<dyn Game> = Arc::new(RockPaperScissorsGame::with_buffer(
                config,
                creator.player().clone(),
                &creator,
                engine.event_buffer,
            )?);

            let runtime = SessionRuntime::new(Arc::clone(&ledger) as Arc<dyn Ledger>);
            runtime.subscribe(Arc::clone(&game)).await?;
            println!("Started rock-paper-scissors game {}", game.id());

            for joiner in joiners {
                let action = choice_action(&joiner)?;
                let player = action.player().clone();
                match runtime
                    .join_game_with_action(&game, player.clone(), action)
                    .await
                {
                    Ok(_) => println!("  {} joined", player),
                    Err(e) => println!("  {} could not join: {}", player, e),
                }
            }

            wait_for_end(&runtime, game.as_ref()).await;
            print_record(&ledger.game(game.id(), true).await?);
        }

        GameCommands::List { game_type } => {
            let game_type = game_type.as_deref().map(GameType::parse).transpose()?;
            let games = ledger.active_games(game_type).await?;

            if games.is_empty() {
                println!("No active games.");
                return Ok(());
            }

            let now = Utc::now();
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                "ID",
                "Type",
                "State",
                "Creator",
                "Cost",
                "Players",
                "Time left",
            ]);

            for game in games {
                table.add_row(vec![
                    game.id.to_string(),
                    game.game_type.to_string(),
                    game.state.to_string(),
                    game.creator.to_string(),
                    from_nano(game.cost as i64).to_string(),
                    format!("{}/{}", game.players.len(), game.max_players),
                    format!("{}s", game.time_left(now).as_secs()),
                ]);
            }

            println!("{}", table);
        }

        GameCommands::Show { id } => {
            let id = Uuid::parse_str(&id).with_context(|| format!("Invalid game id '{}'", id))?;
            print_record(&ledger.game(id, true).await?);
        }
    }

    Ok(())
}

fn settings(cost: f64, players: u8, duration: u64) -> GameSettings {
    GameSettings {
        cost,
        number_of_players: players,
        duration: Duration::from_secs(duration),
    }
}

/// Parses `id:choice` into a join action.
fn choice_action(raw: &str) -> Result<PlayerEvent> {
    let (id, choice) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected <id>:<choice>, got '{}'", raw))?;
    let choice: Choice = choice.parse().map_err(anyhow::Error::msg)?;

    Ok(PlayerEvent::with_payload(
        Player::new(id),
        &PlayerChoiceEvent::new(choice),
    )?)
}

async fn wait_for_end(runtime: &SessionRuntime, game: &dyn Game) {
    println!(
        "Waiting {}s for game {} to finish (Ctrl-C aborts)...",
        game.duration().as_secs(),
        game.id()
    );

    tokio::select! {
        _ = runtime.closed(game.id()) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Aborting...");
            runtime.shutdown();
            runtime.closed(game.id()).await;
        }
    }
}

fn print_record(record: &GameRecord) {
    println!();
    println!("Game Information:");
    println!("  ID: {}", record.id);
    println!("  Type: {}", record.game_type);
    println!("  State: {}", record.state);
    println!("  Creator: {}", record.creator);
    println!("  Cost: {}", from_nano(record.cost as i64));
    println!(
        "  Players: {}/{} ({})",
        record.players.len(),
        record.max_players,
        record
            .players
            .iter()
            .map(|player| player.id())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));

    let Some(history) = record.history.as_ref().filter(|history| !history.is_empty()) else {
        return;
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Event", "Message", "Details"]);

    for entry in history {
        let details = entry
            .metadata
            .as_ref()
            .and_then(|metadata| serde_json::to_string(metadata).ok())
            .unwrap_or_default();

        table.add_row(vec![
            entry.timestamp.format("%H:%M:%S%.3f").to_string(),
            entry.kind.as_str().to_string(),
            entry.message.clone(),
            details,
        ]);
    }

    println!();
    println!("{}", table);
}
