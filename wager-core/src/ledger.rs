//! Persistence boundary consumed by the session runtime.

use crate::error::Result;
use crate::game::{GameEvent, GameEventKind, GameInfo, GameMetadata};
use crate::types::{GameState, GameType, Player};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// In-memory membership change run inside a join/leave transaction. An error
/// rolls the transaction back.
pub type Mutation = BoxFuture<'static, Result<()>>;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Persists a new game and locks the creator's stake. Enforces the
    /// global and per-creator in-progress quotas and the creator's balance.
    async fn create_game(&self, game: &GameInfo) -> Result<GameRecord>;

    /// Locks `player`'s stake, records membership, then awaits `mutation`
    /// in the same transaction.
    async fn join_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord>;

    /// Releases `player`'s stake and membership, then awaits `mutation` in
    /// the same transaction.
    async fn leave_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord>;

    async fn append_event(&self, game: &GameInfo, event: &GameEvent) -> Result<GameRecord>;

    async fn change_game_state(&self, game: &GameInfo, state: GameState) -> Result<GameRecord>;

    async fn unlock_all_players(&self, game: &GameInfo) -> Result<GameRecord>;

    /// Splits the pool evenly among `winners`; every other member loses
    /// their stake.
    async fn store_winners(&self, game: &GameInfo, winners: &[Player]) -> Result<GameRecord>;
}

/// One persisted history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: GameEventKind,
    pub message: String,
    pub metadata: Option<GameMetadata>,
}

/// Durable view of a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: Uuid,
    pub game_type: GameType,
    pub state: GameState,
    pub creator: Player,
    /// Stake per player in nano-units.
    pub cost: u64,
    pub max_players: u8,
    pub duration: Duration,
    pub players: Vec<Player>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Option<Vec<HistoryRecord>>,
}

impl GameRecord {
    /// Time until the game's timer fires, zero once it has.
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        let ends = chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|duration| self.created_at.checked_add_signed(duration));

        match ends {
            Some(ends) => (ends - now).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}
