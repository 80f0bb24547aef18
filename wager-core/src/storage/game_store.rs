use crate::error::{Result, WagerError};
use crate::game::{GameEventKind, GameInfo, GameMetadata};
use crate::ledger::{GameRecord, HistoryRecord};
use crate::storage::{from_millis, to_millis};
use crate::types::{GameState, GameType, Player};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;
use uuid::Uuid;

const ACTIVE_STATES: &str = "('created', 'in_progress')";

struct GameRow {
    id: String,
    game_type: String,
    state: String,
    creator: String,
    cost: i64,
    max_players: i64,
    duration_ms: i64,
    created_at: i64,
    updated_at: i64,
}

impl GameRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            game_type: row.get(1)?,
            state: row.get(2)?,
            creator: row.get(3)?,
            cost: row.get(4)?,
            max_players: row.get(5)?,
            duration_ms: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(
        self,
        players: Vec<Player>,
        history: Option<Vec<HistoryRecord>>,
    ) -> Result<GameRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| WagerError::internal(format!("Bad game id {}: {}", self.id, e)))?;

        Ok(GameRecord {
            id,
            game_type: GameType::parse(&self.game_type)?,
            state: GameState::parse(&self.state)?,
            creator: Player::new(self.creator),
            cost: self.cost.max(0) as u64,
            max_players: self.max_players.clamp(0, u8::MAX as i64) as u8,
            duration: Duration::from_millis(self.duration_ms.max(0) as u64),
            players,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            history,
        })
    }
}

const GAME_COLUMNS: &str =
    "id, game_type, state, creator, cost, max_players, duration_ms, created_at, updated_at";

/// Games, their members, stakes, history and payouts.
pub struct GameStore<'a> {
    conn: &'a Connection,
}

impl<'a> GameStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert_game(&self, game: &GameInfo, cost: u64) -> Result<()> {
        let created_at = to_millis(game.created_at);

        self.conn.execute(
            "INSERT INTO games (id, game_type, state, creator, cost, max_players, duration_ms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                game.id.to_string(),
                game.game_type.as_str(),
                GameState::Created.as_str(),
                game.creator.id(),
                cost as i64,
                game.max_players as i64,
                game.duration.as_millis() as i64,
                created_at,
            ],
        )?;

        Ok(())
    }

    pub fn state(&self, game_id: Uuid) -> Result<Option<GameState>> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM games WHERE id = ?1",
                params![game_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        state.map(|state| GameState::parse(&state)).transpose()
    }

    pub fn set_state(&self, game_id: Uuid, state: GameState) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE games SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), to_millis(Utc::now()), game_id.to_string()],
        )?;

        if updated == 0 {
            return Err(WagerError::GameNotFound(game_id));
        }
        Ok(())
    }

    pub fn count_active(&self) -> Result<u32> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM games WHERE state IN {}", ACTIVE_STATES),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn count_active_by_creator(&self, creator: &Player) -> Result<u32> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM games WHERE creator = ?1 AND state IN {}",
                ACTIVE_STATES
            ),
            params![creator.id()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn active_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM games WHERE state IN {}",
            ACTIVE_STATES
        ))?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|e| WagerError::internal(format!("Bad game id {}: {}", id, e)))
            })
            .collect()
    }

    pub fn members(&self, game_id: Uuid) -> Result<Vec<Player>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id FROM account_games WHERE game_id = ?1 ORDER BY joined_at, account_id",
        )?;

        let members = stmt
            .query_map(params![game_id.to_string()], |row| {
                row.get::<_, String>(0).map(Player::new)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(members)
    }

    pub fn is_member(&self, game_id: Uuid, account: &Player) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM account_games WHERE game_id = ?1 AND account_id = ?2",
                params![game_id.to_string(), account.id()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Records membership and locks the stake.
    pub fn add_member(&self, game_id: Uuid, account: &Player, stake: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO locks (game_id, account_id, amount) VALUES (?1, ?2, ?3)",
            params![game_id.to_string(), account.id(), stake as i64],
        )?;

        self.conn.execute(
            "INSERT INTO account_games (game_id, account_id, joined_at) VALUES (?1, ?2, ?3)",
            params![game_id.to_string(), account.id(), to_millis(Utc::now())],
        )?;

        Ok(())
    }

    pub fn remove_member(&self, game_id: Uuid, account: &Player) -> Result<()> {
        self.conn.execute(
            "DELETE FROM locks WHERE game_id = ?1 AND account_id = ?2",
            params![game_id.to_string(), account.id()],
        )?;

        self.conn.execute(
            "DELETE FROM account_games WHERE game_id = ?1 AND account_id = ?2",
            params![game_id.to_string(), account.id()],
        )?;

        Ok(())
    }

    pub fn unlock_all(&self, game_id: Uuid) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM locks WHERE game_id = ?1",
            params![game_id.to_string()],
        )?;
        Ok(deleted)
    }

    pub fn append_history(
        &self,
        game_id: Uuid,
        timestamp: DateTime<Utc>,
        kind: GameEventKind,
        message: &str,
        metadata: Option<&GameMetadata>,
    ) -> Result<()> {
        let metadata = metadata.map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO histories (game_id, timestamp, kind, message, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                game_id.to_string(),
                to_millis(timestamp),
                kind.as_str(),
                message,
                metadata,
            ],
        )?;

        Ok(())
    }

    pub fn history(&self, game_id: Uuid) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, kind, message, metadata FROM histories
             WHERE game_id = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![game_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut history = Vec::with_capacity(rows.len());
        for (timestamp, kind, message, metadata) in rows {
            let metadata = metadata
                .map(|raw| serde_json::from_str::<GameMetadata>(&raw))
                .transpose()?;

            history.push(HistoryRecord {
                timestamp: from_millis(timestamp),
                kind: GameEventKind::parse(&kind)?,
                message,
                metadata,
            });
        }

        Ok(history)
    }

    pub fn insert_win(&self, game_id: Uuid, account: &Player, amount: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO wins (game_id, account_id, amount, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![game_id.to_string(), account.id(), amount, to_millis(Utc::now())],
        )?;
        Ok(())
    }

    pub fn load(&self, game_id: Uuid, with_history: bool) -> Result<Option<GameRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM games WHERE id = ?1", GAME_COLUMNS),
                params![game_id.to_string()],
                GameRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let history = if with_history {
            Some(self.history(game_id)?)
        } else {
            None
        };

        row.into_record(self.members(game_id)?, history).map(Some)
    }

    /// Games still created or running, newest first.
    pub fn active(&self, game_type: Option<GameType>) -> Result<Vec<GameRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM games
             WHERE state IN {} AND (?1 IS NULL OR game_type = ?1)
             ORDER BY created_at DESC",
            GAME_COLUMNS, ACTIVE_STATES
        ))?;

        let rows = stmt
            .query_map(params![game_type.map(|t| t.as_str())], GameRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut games = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Uuid::parse_str(&row.id)
                .map_err(|e| WagerError::internal(format!("Bad game id {}: {}", row.id, e)))?;
            games.push(row.into_record(self.members(id)?, None)?);
        }

        Ok(games)
    }
}
