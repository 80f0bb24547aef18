use crate::error::{Result, WagerError};
use crate::types::Player;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variant-specific resolution detail attached to an event.
pub type GameMetadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    Start,
    Update,
    PlayerJoined,
    PlayerLeft,
    Abort,
    WinnersRevealed,
    NoWinners,
    Finished,
    Error,
}

impl GameEventKind {
    /// Kinds after which the stream is closed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GameEventKind::Abort | GameEventKind::Finished | GameEventKind::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameEventKind::Start => "start",
            GameEventKind::Update => "update",
            GameEventKind::PlayerJoined => "player_joined",
            GameEventKind::PlayerLeft => "player_left",
            GameEventKind::Abort => "abort",
            GameEventKind::WinnersRevealed => "winners_revealed",
            GameEventKind::NoWinners => "no_winners",
            GameEventKind::Finished => "finished",
            GameEventKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let kind = match value {
            "start" => GameEventKind::Start,
            "update" => GameEventKind::Update,
            "player_joined" => GameEventKind::PlayerJoined,
            "player_left" => GameEventKind::PlayerLeft,
            "abort" => GameEventKind::Abort,
            "winners_revealed" => GameEventKind::WinnersRevealed,
            "no_winners" => GameEventKind::NoWinners,
            "finished" => GameEventKind::Finished,
            "error" => GameEventKind::Error,
            other => {
                return Err(WagerError::internal(format!(
                    "Unknown event kind: {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// One entry of a game's event stream. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    game_id: Uuid,
    kind: GameEventKind,
    message: String,
    timestamp: DateTime<Utc>,
    players: Vec<Player>,
    public: bool,
    metadata: Option<GameMetadata>,
}

impl GameEvent {
    pub(crate) fn new(
        game_id: Uuid,
        kind: GameEventKind,
        message: impl Into<String>,
        players: Vec<Player>,
        metadata: Option<GameMetadata>,
    ) -> Self {
        Self {
            game_id,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            players,
            public: true,
            metadata,
        }
    }

    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    pub fn kind(&self) -> GameEventKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Whether the event belongs in the public game history.
    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn metadata(&self) -> Option<&GameMetadata> {
        self.metadata.as_ref()
    }
}
