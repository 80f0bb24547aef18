pub mod account_store;
pub mod game_store;
pub mod ledger;

pub use account_store::AccountStore;
pub use game_store::GameStore;
pub use ledger::SqliteLedger;

use crate::error::{Result, WagerError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WagerError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Accounts table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                deposited INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Games table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                game_type TEXT NOT NULL,
                state TEXT NOT NULL,
                creator TEXT NOT NULL,
                cost INTEGER NOT NULL,
                max_players INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Membership table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_games (
                game_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, account_id)
            )",
            [],
        )?;

        // Stakes held while a game runs
        conn.execute(
            "CREATE TABLE IF NOT EXISTS locks (
                game_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, account_id)
            )",
            [],
        )?;

        // Public event history
        conn.execute(
            "CREATE TABLE IF NOT EXISTS histories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT,
                FOREIGN KEY (game_id) REFERENCES games(id)
            )",
            [],
        )?;

        // Payouts, negative for losers
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wins (
                game_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, account_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_games_state ON games (state, game_type)",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
