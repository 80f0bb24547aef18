use crate::error::{Result, WagerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nano-units per whole unit of stake.
pub const NANOS_PER_UNIT: u64 = 1_000_000_000;

/// Converts a decimal stake into integer nano-units.
pub fn to_nano(amount: f64) -> u64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * NANOS_PER_UNIT as f64).round() as u64
}

pub fn from_nano(amount: i64) -> f64 {
    amount as f64 / NANOS_PER_UNIT as f64
}

/// Opaque player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Player {
    id: String,
}

impl Player {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Player {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    HighLow,
    RockPaperScissors,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::HighLow => "high_low",
            GameType::RockPaperScissors => "rock_paper_scissors",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "high_low" | "high-low" => Ok(GameType::HighLow),
            "rock_paper_scissors" | "rps" => Ok(GameType::RockPaperScissors),
            other => Err(WagerError::config(format!("Unknown game type: {}", other))),
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lifecycle state of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Created,
    InProgress,
    Finished,
    Error,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Created => "created",
            GameState::InProgress => "in_progress",
            GameState::Finished => "finished",
            GameState::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "created" => Ok(GameState::Created),
            "in_progress" => Ok(GameState::InProgress),
            "finished" => Ok(GameState::Finished),
            "error" => Ok(GameState::Error),
            other => Err(WagerError::internal(format!("Unknown game state: {}", other))),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, GameState::Created | GameState::InProgress)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account balance in nano-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: i64,
    pub locked: u64,
    pub available: i64,
}

impl Balance {
    pub fn new(total: i64, locked: u64) -> Self {
        Self {
            total,
            locked,
            available: total - locked as i64,
        }
    }

    pub fn zero() -> Self {
        Self::new(0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nano_conversion() {
        assert_eq!(to_nano(1.0), NANOS_PER_UNIT);
        assert_eq!(to_nano(0.2), 200_000_000);
        assert_eq!(to_nano(-1.0), 0);
        assert_eq!(from_nano(1_500_000_000), 1.5);
    }

    #[test]
    fn test_state_round_trip_names() {
        for state in [
            GameState::Created,
            GameState::InProgress,
            GameState::Finished,
            GameState::Error,
        ] {
            assert_eq!(GameState::parse(state.as_str()).unwrap(), state);
        }
        assert!(GameState::InProgress.is_active());
        assert!(!GameState::Error.is_active());
        assert_eq!(GameType::parse("rps").unwrap(), GameType::RockPaperScissors);
    }

    #[test]
    fn test_balance_available() {
        let balance = Balance::new(10, 4);
        assert_eq!(balance.available, 6);
        assert_eq!(Balance::zero().available, 0);
    }
}
