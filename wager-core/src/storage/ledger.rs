use crate::config::LedgerLimits;
use crate::error::{Result, WagerError};
use crate::game::{GameEvent, GameInfo};
use crate::ledger::{GameRecord, Ledger, Mutation};
use crate::storage::{AccountStore, GameStore, Storage};
use crate::types::{to_nano, Balance, GameState, GameType, Player};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Ledger backed by a single SQLite connection. Every transaction holds the
/// connection for its whole duration, membership mutations included, so a
/// mutation must never wait on the game's event consumer: the runtime
/// reserves the event slot before the transaction begins.
pub struct SqliteLedger {
    storage: Arc<Storage>,
    limits: LedgerLimits,
}

impl SqliteLedger {
    pub fn new(storage: Arc<Storage>, limits: LedgerLimits) -> Self {
        Self { storage, limits }
    }

    pub async fn open(db_path: &Path, limits: LedgerLimits) -> Result<Self> {
        let storage = Arc::new(Storage::new(db_path).await?);
        Ok(Self::new(storage, limits))
    }

    pub async fn in_memory(limits: LedgerLimits) -> Result<Self> {
        let storage = Arc::new(Storage::in_memory().await?);
        Ok(Self::new(storage, limits))
    }

    pub fn limits(&self) -> &LedgerLimits {
        &self.limits
    }

    pub async fn deposit(&self, account: &Player, amount: u64) -> Result<Balance> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;

        let accounts = AccountStore::new(&conn);
        accounts.deposit(account, amount)?;

        tracing::info!("Deposited {} to account {}", amount, account);
        accounts.balance(account)
    }

    pub async fn balance(&self, account: &Player) -> Result<Balance> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;
        AccountStore::new(&conn).balance(account)
    }

    /// Closes every game a previous process left created or in progress and
    /// releases its stakes. Returns how many games were closed.
    pub async fn recover_interrupted_games(&self) -> Result<usize> {
        let conn = self.storage.get_connection().await;

        let recovered = in_transaction(&conn, |conn| {
            let games = GameStore::new(conn);
            let ids = games.active_ids()?;
            for id in &ids {
                games.set_state(*id, GameState::Finished)?;
                games.unlock_all(*id)?;
            }
            Ok(ids.len())
        })?;

        if recovered > 0 {
            tracing::warn!("Closed {} interrupted games", recovered);
        }
        Ok(recovered)
    }

    pub async fn game(&self, game_id: Uuid, with_history: bool) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;
        load(&conn, game_id, with_history)
    }

    /// Created or running games, newest first, optionally of one type.
    pub async fn active_games(&self, game_type: Option<GameType>) -> Result<Vec<GameRecord>> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;
        GameStore::new(&conn).active(game_type)
    }

    fn stage_create(&self, conn: &Connection, game: &GameInfo, stake: u64) -> Result<()> {
        AccountStore::new(conn).can_afford(&game.creator, stake)?;

        let games = GameStore::new(conn);
        if games.count_active()? >= self.limits.max_games_in_progress {
            return Err(WagerError::MaxGamesInProgress(
                self.limits.max_games_in_progress,
            ));
        }

        if games.count_active_by_creator(&game.creator)?
            >= self.limits.max_player_games_in_progress
        {
            return Err(WagerError::MaxPlayerGamesInProgress(
                self.limits.max_player_games_in_progress,
            ));
        }

        games.insert_game(game, stake)?;
        games.add_member(game.id, &game.creator, stake)
    }
}

fn stage_join(conn: &Connection, game: &GameInfo, player: &Player, stake: u64) -> Result<()> {
    let games = GameStore::new(conn);

    match games.state(game.id)? {
        None => return Err(WagerError::GameNotFound(game.id)),
        Some(state) if !state.is_active() => return Err(WagerError::GameFinished),
        Some(_) => {}
    }

    if games.is_member(game.id, player)? {
        return Err(WagerError::AlreadyJoined(player.id().to_string()));
    }

    AccountStore::new(conn).can_afford(player, stake)?;

    if games.members(game.id)?.len() + 1 > game.max_players as usize {
        return Err(WagerError::MaxPlayersInGame);
    }

    games.add_member(game.id, player, stake)
}

fn stage_leave(conn: &Connection, game: &GameInfo, player: &Player) -> Result<()> {
    let games = GameStore::new(conn);
    if games.state(game.id)?.is_none() {
        return Err(WagerError::GameNotFound(game.id));
    }
    games.remove_member(game.id, player)
}

fn stage_winners(conn: &Connection, game: &GameInfo, winners: &[Player]) -> Result<()> {
    if winners.is_empty() {
        return Err(WagerError::incorrect_game("no winners to pay out"));
    }

    let games = GameStore::new(conn);
    games.unlock_all(game.id)?;

    let members = games.members(game.id)?;
    let stake = to_nano(game.cost) as i64;
    let bank = stake * members.len() as i64;
    let share = bank / winners.len() as i64 - stake;

    for member in &members {
        let amount = if winners.contains(member) { share } else { -stake };
        games.insert_win(game.id, member, amount)?;
    }

    Ok(())
}

/// Rolls back a transaction whose owner went away mid-flight.
fn reset(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        tracing::warn!("Rolling back abandoned transaction");
        conn.execute_batch("ROLLBACK")?;
    }
    Ok(())
}

fn begin(conn: &Connection) -> Result<()> {
    reset(conn)?;
    conn.execute_batch("BEGIN IMMEDIATE")?;
    Ok(())
}

fn finish<T>(conn: &Connection, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::error!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

fn in_transaction<T>(conn: &Connection, work: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    begin(conn)?;
    let outcome = work(conn);
    finish(conn, outcome)
}

fn load(conn: &Connection, game_id: Uuid, with_history: bool) -> Result<GameRecord> {
    GameStore::new(conn)
        .load(game_id, with_history)?
        .ok_or(WagerError::GameNotFound(game_id))
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn create_game(&self, game: &GameInfo) -> Result<GameRecord> {
        let stake = to_nano(game.cost);
        let conn = self.storage.get_connection().await;

        in_transaction(&conn, |conn| self.stage_create(conn, game, stake))?;

        tracing::info!(
            "Created {} game {} by {} with stake {}",
            game.game_type,
            game.id,
            game.creator,
            stake
        );
        load(&conn, game.id, false)
    }

    async fn join_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord> {
        if *player == game.creator {
            return Err(WagerError::CreatorCantJoin);
        }

        let stake = to_nano(game.cost);
        let conn = self.storage.get_connection().await;

        begin(&conn)?;
        if let Err(e) = stage_join(&conn, game, player, stake) {
            return finish(&conn, Err(e));
        }

        let outcome = mutation.await;
        finish(&conn, outcome)?;

        load(&conn, game.id, false)
    }

    async fn leave_game(
        &self,
        game: &GameInfo,
        player: &Player,
        mutation: Mutation,
    ) -> Result<GameRecord> {
        if *player == game.creator {
            return Err(WagerError::CreatorCantLeave);
        }

        let conn = self.storage.get_connection().await;

        begin(&conn)?;
        if let Err(e) = stage_leave(&conn, game, player) {
            return finish(&conn, Err(e));
        }

        let outcome = mutation.await;
        finish(&conn, outcome)?;

        load(&conn, game.id, false)
    }

    async fn append_event(&self, game: &GameInfo, event: &GameEvent) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;

        GameStore::new(&conn).append_history(
            game.id,
            event.timestamp(),
            event.kind(),
            event.message(),
            event.metadata(),
        )?;

        load(&conn, game.id, true)
    }

    async fn change_game_state(&self, game: &GameInfo, state: GameState) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;

        GameStore::new(&conn).set_state(game.id, state)?;
        tracing::debug!("Game {} is now {}", game.id, state);

        load(&conn, game.id, false)
    }

    async fn unlock_all_players(&self, game: &GameInfo) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;
        reset(&conn)?;

        let released = GameStore::new(&conn).unlock_all(game.id)?;
        tracing::debug!("Released {} stakes of game {}", released, game.id);

        load(&conn, game.id, false)
    }

    async fn store_winners(&self, game: &GameInfo, winners: &[Player]) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;

        in_transaction(&conn, |conn| stage_winners(conn, game, winners))?;
        tracing::info!("Stored {} winners of game {}", winners.len(), game.id);

        load(&conn, game.id, false)
    }
}
