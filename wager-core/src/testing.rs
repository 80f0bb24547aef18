use crate::error::{Result, WagerError};
use crate::game::{GameEvent, GameEventKind, GameInfo};
use crate::ledger::{GameRecord, Ledger, Mutation};
use crate::types::{to_nano, GameState, Player};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Create(Uuid),
    Join(Player),
    Leave(Player),
    Append(GameEventKind),
    State(GameState),
    UnlockAll,
    Winners(Vec<Player>),
}

/// Ledger double that records every committed call in order. Membership
/// mutations run under a lock standing in for the transaction; a failed
/// mutation records nothing.
#[derive(Default)]
pub(crate) struct RecordingLedger {
    calls: Mutex<Vec<Call>>,
    fail_create: bool,
    create_delay: Option<Duration>,
    transaction: tokio::sync::Mutex<()>,
}

impl RecordingLedger {
    pub(crate) fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// Fails creation only after `delay`, leaving the game pending meanwhile.
    pub(crate) fn slow_failing_create(delay: Duration) -> Self {
        Self {
            fail_create: true,
            create_delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn appended(&self) -> Vec<GameEventKind> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Append(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn record(game: &GameInfo, state: GameState) -> GameRecord {
        GameRecord {
            id: game.id,
            game_type: game.game_type,
            state,
            creator: game.creator.clone(),
            cost: to_nano(game.cost),
            max_players: game.max_players,
            duration: game.duration,
            players: vec![game.creator.clone()],
            created_at: game.created_at,
            updated_at: game.created_at,
            history: None,
        }
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn create_game(&self, game: &GameInfo) -> Result<GameRecord> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create {
            return Err(WagerError::MaxGamesInProgress(0));
        }
        self.push(Call::Create(game.id));
        Ok(Self::record(game, GameState::Created))
    }

    async fn join_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord> {
        let _transaction = self.transaction.lock().await;
        mutation.await?;
        self.push(Call::Join(player.clone()));
        Ok(Self::record(game, GameState::InProgress))
    }

    async fn leave_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord> {
        let _transaction = self.transaction.lock().await;
        mutation.await?;
        self.push(Call::Leave(player.clone()));
        Ok(Self::record(game, GameState::InProgress))
    }

    async fn append_event(&self, game: &GameInfo, event: &GameEvent) -> Result<GameRecord> {
        self.push(Call::Append(event.kind()));
        Ok(Self::record(game, GameState::InProgress))
    }

    async fn change_game_state(&self, game: &GameInfo, state: GameState) -> Result<GameRecord> {
        self.push(Call::State(state));
        Ok(Self::record(game, state))
    }

    async fn unlock_all_players(&self, game: &GameInfo) -> Result<GameRecord> {
        self.push(Call::UnlockAll);
        Ok(Self::record(game, GameState::InProgress))
    }

    async fn store_winners(&self, game: &GameInfo, winners: &[Player]) -> Result<GameRecord> {
        self.push(Call::Winners(winners.to_vec()));
        Ok(Self::record(game, GameState::InProgress))
    }
}
