use super::{amount_from_sql, amount_to_sql};
use crate::error::Result;
use crate::types::Address;
use bitcoin::Amount;
use rusqlite::{params, Connection, OptionalExtension};

/// Pull balances plus the scalar settings (house balance, commission).
pub struct BalanceStore<'a> {
    conn: &'a Connection,
}

impl<'a> BalanceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn balance(&self, who: &Address) -> Result<Amount> {
        let raw: Option<i64> = self
            .conn
            .query_row(
                "SELECT amount FROM balances WHERE address = ?1",
                params![who.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(amount_from_sql).unwrap_or(Ok(Amount::ZERO))
    }

    pub fn set_balance(&self, who: &Address, amount: Amount) -> Result<()> {
        if amount == Amount::ZERO {
            self.conn.execute(
                "DELETE FROM balances WHERE address = ?1",
                params![who.to_string()],
            )?;
            return Ok(());
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO balances (address, amount) VALUES (?1, ?2)",
            params![who.to_string(), amount_to_sql(amount)?],
        )?;
        Ok(())
    }

    pub fn setting(&self, key: &str) -> Result<Option<Amount>> {
        let raw: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(amount_from_sql).transpose()
    }

    pub fn set_setting(&self, key: &str, amount: Amount) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, amount_to_sql(amount)?],
        )?;
        Ok(())
    }
}
