use super::{amount_from_sql, amount_to_sql};
use crate::error::{CoreError, Result};
use crate::types::{Address, Choice, Wager, WagerId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Raw `wagers` row before validation.
struct WagerRow {
    id: String,
    amount: i64,
    expiry_at: i64,
    bettor: String,
    opponent: String,
    counter_choice: Option<u8>,
}

impl WagerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            amount: row.get(1)?,
            expiry_at: row.get(2)?,
            bettor: row.get(3)?,
            opponent: row.get(4)?,
            counter_choice: row.get(5)?,
        })
    }

    fn into_wager(self) -> Result<(WagerId, Wager)> {
        let id: WagerId = self.id.parse()?;
        let counter_choice = self
            .counter_choice
            .map(Choice::try_from)
            .transpose()
            .map_err(|e| CoreError::corrupt(format!("wager {}: {}", id, e)))?;
        let expiry_at = u64::try_from(self.expiry_at)
            .map_err(|_| CoreError::corrupt(format!("wager {}: negative expiry", id)))?;

        let wager = Wager {
            amount: amount_from_sql(self.amount)?,
            expiry_at,
            bettor: self.bettor.parse::<Address>()?,
            opponent: self.opponent.parse::<Address>()?,
            counter_choice,
        };
        Ok((id, wager))
    }
}

pub struct WagerStore<'a> {
    conn: &'a Connection,
}

impl<'a> WagerStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn save(&self, id: &WagerId, wager: &Wager) -> Result<()> {
        let expiry_at = i64::try_from(wager.expiry_at)
            .map_err(|_| CoreError::internal(format!("expiry too large: {}", wager.expiry_at)))?;

        self.conn.execute(
            "INSERT OR REPLACE INTO wagers (id, amount, expiry_at, bettor, opponent, counter_choice, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                amount_to_sql(wager.amount)?,
                expiry_at,
                wager.bettor.to_string(),
                wager.opponent.to_string(),
                wager.counter_choice.map(Choice::as_u8),
                Utc::now().timestamp(),
            ],
        )?;

        Ok(())
    }

    pub fn load(&self, id: &WagerId) -> Result<Option<Wager>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, amount, expiry_at, bettor, opponent, counter_choice
                 FROM wagers WHERE id = ?1",
                params![id.to_string()],
                WagerRow::from_row,
            )
            .optional()?;

        row.map(|row| row.into_wager().map(|(_, wager)| wager))
            .transpose()
    }

    pub fn delete(&self, id: &WagerId) -> Result<()> {
        self.conn
            .execute("DELETE FROM wagers WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<(WagerId, Wager)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, amount, expiry_at, bettor, opponent, counter_choice
             FROM wagers ORDER BY updated_at DESC, id ASC",
        )?;

        let rows = stmt.query_map([], WagerRow::from_row)?;

        let mut wagers = Vec::new();
        for row in rows {
            wagers.push(row?.into_wager()?);
        }

        Ok(wagers)
    }
}
