use crate::error::{Result, WagerError};
use crate::storage::to_millis;
use crate::types::{Balance, Player};
use chrono::Utc;
use rusqlite::{params, Connection};

/// Account balances. Operates on a connection the caller already holds so
/// that checks can share a transaction with the writes they guard.
pub struct AccountStore<'a> {
    conn: &'a Connection,
}

impl<'a> AccountStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn deposit(&self, account: &Player, amount: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO accounts (id, deposited, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET deposited = deposited + excluded.deposited",
            params![account.id(), amount as i64, to_millis(Utc::now())],
        )?;

        Ok(())
    }

    /// Deposits plus winnings (negative for losses), minus what is locked in
    /// running games. Unknown accounts have a zero balance.
    pub fn balance(&self, account: &Player) -> Result<Balance> {
        let deposited: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(deposited), 0) FROM accounts WHERE id = ?1",
            params![account.id()],
            |row| row.get(0),
        )?;

        let winnings: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM wins WHERE account_id = ?1",
            params![account.id()],
            |row| row.get(0),
        )?;

        let locked: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM locks WHERE account_id = ?1",
            params![account.id()],
            |row| row.get(0),
        )?;

        Ok(Balance::new(deposited + winnings, locked.max(0) as u64))
    }

    /// Fails with `InsufficientFunds` unless `amount` is available.
    pub fn can_afford(&self, account: &Player, amount: u64) -> Result<Balance> {
        let balance = self.balance(account)?;
        if balance.available < amount as i64 {
            return Err(WagerError::InsufficientFunds {
                need: amount,
                available: balance.available,
            });
        }
        Ok(balance)
    }
}
