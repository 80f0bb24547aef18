//! Game contract and the two game variants.
//!
//! A game is a short-lived state machine: players join and leave while it
//! runs, a one-shot timer ends it, and every transition is pushed onto a
//! bounded event queue that exactly one consumer drains. Producers wait for
//! queue capacity before taking any lock, never while holding one.

pub mod event;
pub mod high_low;
pub mod rock_paper_scissors;
mod round;

pub use event::{GameEvent, GameEventKind, GameMetadata};
pub use high_low::{HighLowConfig, HighLowGame};
pub use rock_paper_scissors::{
    Choice, PlayerChoiceEvent, RockPaperScissorsConfig, RockPaperScissorsGame,
};

use crate::error::Result;
use crate::types::{GameType, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Settings shared by every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    /// Stake per player, in whole units.
    pub cost: f64,
    pub number_of_players: u8,
    pub duration: Duration,
}

/// A player-submitted action with a variant-specific raw payload.
#[derive(Debug, Clone)]
pub struct PlayerEvent {
    player: Player,
    raw: Vec<u8>,
}

impl PlayerEvent {
    pub fn new(player: Player, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            player,
            raw: raw.into(),
        }
    }

    pub fn with_payload<T: Serialize>(player: Player, payload: &T) -> Result<Self> {
        Ok(Self::new(player, serde_json::to_vec(payload)?))
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Outcome of a resolution: who won, plus detail for the history.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winners: Vec<Player>,
    pub metadata: GameMetadata,
}

/// Snapshot of a game's immutable attributes, handed to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: Uuid,
    pub game_type: GameType,
    pub cost: f64,
    pub max_players: u8,
    pub duration: Duration,
    pub creator: Player,
    pub created_at: DateTime<Utc>,
}

/// Room reserved in a game's event queue for one membership event.
///
/// Reserve it before entering a ledger transaction: a change applied with a
/// slot never waits on the queue consumer. Holding a slot keeps the stream
/// open, so drop it as soon as the change is applied or rejected.
pub struct EventSlot(mpsc::OwnedPermit<GameEvent>);

impl EventSlot {
    pub(crate) fn new(permit: mpsc::OwnedPermit<GameEvent>) -> Self {
        Self(permit)
    }

    pub(crate) fn send(self, event: GameEvent) {
        self.0.send(event);
    }
}

impl fmt::Debug for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSlot")
    }
}

#[async_trait]
pub trait Game: Send + Sync + fmt::Debug {
    fn id(&self) -> Uuid;

    fn game_type(&self) -> GameType;

    fn cost(&self) -> f64;

    fn duration(&self) -> Duration;

    fn creator(&self) -> &Player;

    fn max_players(&self) -> u8;

    fn created_at(&self) -> DateTime<Utc>;

    async fn players(&self) -> Vec<Player>;

    /// Waits until the event queue has room for one more event. Fails with
    /// `GameFinished` once the game has ended.
    async fn reserve_slot(&self) -> Result<EventSlot>;

    async fn add_player_in(&self, slot: EventSlot, player: Player) -> Result<()>;

    async fn add_player_with_action_in(
        &self,
        slot: EventSlot,
        player: Player,
        event: PlayerEvent,
    ) -> Result<()>;

    async fn remove_player_in(&self, slot: EventSlot, player: Player) -> Result<()>;

    async fn add_player(&self, player: Player) -> Result<()> {
        let slot = self.reserve_slot().await?;
        self.add_player_in(slot, player).await
    }

    async fn add_player_with_action(&self, player: Player, event: PlayerEvent) -> Result<()> {
        let slot = self.reserve_slot().await?;
        self.add_player_with_action_in(slot, player, event).await
    }

    async fn remove_player(&self, player: Player) -> Result<()> {
        let slot = self.reserve_slot().await?;
        self.remove_player_in(slot, player).await
    }

    /// Arms the game timer and emits the `start` event. A second call is a
    /// no-op. Firing `shutdown` aborts the game.
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<()>;

    /// Cancels a running game; it then emits `abort` and closes its stream.
    async fn abort(&self) -> Result<()>;

    async fn resolve_winners(&self) -> Result<Resolution>;

    async fn send_user_event(&self, event: PlayerEvent) -> Result<()>;

    /// Hands out the receiving end of the event stream, once.
    fn take_updates(&self) -> Option<mpsc::Receiver<GameEvent>>;

    fn info(&self) -> GameInfo {
        GameInfo {
            id: self.id(),
            game_type: self.game_type(),
            cost: self.cost(),
            max_players: self.max_players(),
            duration: self.duration(),
            creator: self.creator().clone(),
            created_at: self.created_at(),
        }
    }
}
