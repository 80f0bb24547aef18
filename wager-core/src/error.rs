use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WagerError>;

#[derive(Error, Debug)]
pub enum WagerError {
    #[error("invalid action")]
    InvalidAction,

    #[error("max players reached")]
    MaxPlayers,

    #[error("game already finished")]
    GameFinished,

    #[error("creator cannot leave")]
    CreatorCantLeave,

    #[error("game is not started")]
    NotStarted,

    #[error("invalid game id")]
    InvalidGameId,

    #[error("incorrect game: {0}")]
    IncorrectGame(String),

    #[error("max games in progress: {0}")]
    MaxGamesInProgress(u32),

    #[error("max games per player in progress: {0}")]
    MaxPlayerGamesInProgress(u32),

    #[error("max players in game")]
    MaxPlayersInGame,

    #[error("small balance: need {need}, available {available}")]
    InsufficientFunds { need: u64, available: i64 },

    #[error("creator already part of the game")]
    CreatorCantJoin,

    #[error("player {0} already part of the game")]
    AlreadyJoined(String),

    #[error("game not found: {0}")]
    GameNotFound(Uuid),

    #[error("game creation failed: {0}")]
    CreationFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WagerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn incorrect_game(msg: impl Into<String>) -> Self {
        Self::IncorrectGame(msg.into())
    }

    /// Rejected player input. Never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAction
                | Self::MaxPlayers
                | Self::GameFinished
                | Self::CreatorCantLeave
                | Self::NotStarted
                | Self::InvalidGameId
                | Self::CreatorCantJoin
                | Self::AlreadyJoined(_)
        )
    }

    /// Quota rejections raised while creating or joining a game.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::MaxGamesInProgress(_)
                | Self::MaxPlayerGamesInProgress(_)
                | Self::MaxPlayersInGame
                | Self::InsufficientFunds { .. }
        )
    }
}
