//! wager - session engine for timed, multi-player wagering games
//!
//! Games run as short-lived state machines that stream their transitions;
//! the [`SessionRuntime`] registers live games, routes membership changes
//! through a [`Ledger`] and persists every event exactly once.

pub mod config;
pub mod error;
pub mod game;
pub mod ledger;
pub mod session;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{EngineConfig, GameLimits, LedgerLimits};
pub use error::{Result, WagerError};
pub use game::{
    Choice, EventSlot, Game, GameEvent, GameEventKind, GameInfo, GameSettings, HighLowConfig, HighLowGame,
    PlayerChoiceEvent, PlayerEvent, RockPaperScissorsConfig, RockPaperScissorsGame,
};
pub use ledger::{GameRecord, HistoryRecord, Ledger};
pub use session::SessionRuntime;
pub use storage::SqliteLedger;
pub use types::{from_nano, to_nano, Balance, GameState, GameType, Player};
