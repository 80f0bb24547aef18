use crate::error::{Result, WagerError};
use crate::game::{GameSettings, HighLowConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of a game's event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of each game's event queue.
    pub event_buffer: usize,
    pub ledger: LedgerLimits,
    pub limits: GameLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLimits {
    pub max_games_in_progress: u32,
    pub max_player_games_in_progress: u32,
}

/// Product bounds an outer layer enforces before creating a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameLimits {
    pub min_cost: f64,
    pub max_cost: f64,
    pub min_players: u8,
    pub max_players: u8,
    pub min_random: u32,
    pub max_random: u32,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            ledger: LedgerLimits::default(),
            limits: GameLimits::default(),
        }
    }
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_games_in_progress: 100,
            max_player_games_in_progress: 5,
        }
    }
}

impl Default for GameLimits {
    fn default() -> Self {
        Self {
            min_cost: 0.2,
            max_cost: 100.0,
            min_players: 2,
            max_players: 8,
            min_random: 100,
            max_random: 1_000_000,
            min_duration: Duration::from_secs(30),
            max_duration: Duration::from_secs(120 * 60),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `EVENT_BUFFER`, `MAX_GAMES_IN_PROGRESS` and
    /// `MAX_PLAYER_GAMES_IN_PROGRESS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_number("EVENT_BUFFER")? {
            config.event_buffer = value as usize;
        }
        if let Some(value) = env_number("MAX_GAMES_IN_PROGRESS")? {
            config.ledger.max_games_in_progress = value as u32;
        }
        if let Some(value) = env_number("MAX_PLAYER_GAMES_IN_PROGRESS")? {
            config.ledger.max_player_games_in_progress = value as u32;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(WagerError::config("Event buffer must be greater than 0"));
        }

        if self.ledger.max_games_in_progress == 0 {
            return Err(WagerError::config(
                "Max games in progress must be greater than 0",
            ));
        }

        if self.ledger.max_player_games_in_progress == 0 {
            return Err(WagerError::config(
                "Max games per player must be greater than 0",
            ));
        }

        self.limits.validate()
    }
}

impl GameLimits {
    pub fn validate(&self) -> Result<()> {
        if self.min_cost > self.max_cost
            || self.min_players > self.max_players
            || self.min_random > self.max_random
            || self.min_duration > self.max_duration
        {
            return Err(WagerError::config("Game limits have min above max"));
        }
        Ok(())
    }

    pub fn check_settings(&self, settings: &GameSettings) -> Result<()> {
        if settings.cost < self.min_cost || settings.cost > self.max_cost {
            return Err(WagerError::config(format!(
                "game cost from {:.2} to {}",
                self.min_cost, self.max_cost
            )));
        }

        if settings.number_of_players < self.min_players
            || settings.number_of_players > self.max_players
        {
            return Err(WagerError::config(format!(
                "number of players from {} to {}",
                self.min_players, self.max_players
            )));
        }

        if settings.duration < self.min_duration || settings.duration > self.max_duration {
            return Err(WagerError::config(format!(
                "game duration value from {:?} to {:?}",
                self.min_duration, self.max_duration
            )));
        }

        Ok(())
    }

    pub fn check_high_low(&self, config: &HighLowConfig) -> Result<()> {
        self.check_settings(&config.settings)?;

        if config.max_random < self.min_random || config.max_random > self.max_random {
            return Err(WagerError::config(format!(
                "max random from {} to {}",
                self.min_random, self.max_random
            )));
        }

        Ok(())
    }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| WagerError::config(format!("{} is not a number: {}", key, e))),
        Err(_) => Ok(None),
    }
}
