pub mod balance_store;
pub mod memory;
pub mod wager_store;

pub use balance_store::BalanceStore;
pub use memory::MemoryStore;
pub use wager_store::WagerStore;

use crate::error::{CoreError, Result};
use crate::types::{Address, Wager, WagerId};
use async_trait::async_trait;
use bitcoin::Amount;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// Keyed repository behind the escrow: wager records, pull balances,
/// the house balance and the current commission.
///
/// `commit` must apply a whole [`Changeset`] or nothing, and must check the
/// changeset's expectations under the same lock it writes with.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, id: &WagerId) -> Result<Option<Wager>>;
    async fn put(&self, id: &WagerId, wager: &Wager) -> Result<()>;
    async fn remove(&self, id: &WagerId) -> Result<()>;
    async fn list(&self) -> Result<Vec<(WagerId, Wager)>>;
    async fn balance_of(&self, who: &Address) -> Result<Amount>;
    async fn house_balance(&self) -> Result<Amount>;
    async fn commission(&self) -> Result<Option<Amount>>;
    async fn commit(&self, changes: &Changeset) -> Result<()>;
}

/// Values an operation read and decided on. A commit is refused with
/// [`CoreError::Conflict`] unless the ledger still holds exactly these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    pub wagers: Vec<(WagerId, Option<Wager>)>,
    pub balances: Vec<(Address, Amount)>,
    pub house: Option<Amount>,
    pub commission: Option<Option<Amount>>,
}

impl Expectations {
    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
            && self.balances.is_empty()
            && self.house.is_none()
            && self.commission.is_none()
    }

    fn wager(&self, id: &WagerId) -> Option<&Option<Wager>> {
        self.wagers.iter().find(|(k, _)| k == id).map(|(_, w)| w)
    }

    fn balance(&self, who: &Address) -> Option<Amount> {
        self.balances
            .iter()
            .find(|(k, _)| k == who)
            .map(|(_, amount)| *amount)
    }
}

/// Read access a backend offers while it holds its write lock.
pub(crate) trait LedgerView {
    fn wager(&self, id: &WagerId) -> Result<Option<Wager>>;
    fn balance(&self, who: &Address) -> Result<Amount>;
    fn house(&self) -> Result<Amount>;
    fn commission(&self) -> Result<Option<Amount>>;
}

/// Writes produced by one operation, plus the reads they were decided on.
/// Balances are absolute values. A `None` wager entry removes the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub wagers: Vec<(WagerId, Option<Wager>)>,
    pub balances: Vec<(Address, Amount)>,
    pub house: Option<Amount>,
    pub commission: Option<Amount>,
    pub expected: Expectations,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the changeset writes nothing.
    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
            && self.balances.is_empty()
            && self.house.is_none()
            && self.commission.is_none()
    }

    pub fn put_wager(&mut self, id: WagerId, wager: Wager) {
        self.set_wager(id, Some(wager));
    }

    pub fn set_wager(&mut self, id: WagerId, wager: Option<Wager>) {
        match self.wagers.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = wager,
            None => self.wagers.push((id, wager)),
        }
    }

    pub fn set_balance(&mut self, who: Address, amount: Amount) {
        match self.balances.iter_mut().find(|(k, _)| *k == who) {
            Some(entry) => entry.1 = amount,
            None => self.balances.push((who, amount)),
        }
    }

    /// Balance as it will be after this changeset, if it touches `who`.
    pub fn pending_balance(&self, who: &Address) -> Option<Amount> {
        self.balances
            .iter()
            .find(|(k, _)| k == who)
            .map(|(_, amount)| *amount)
    }

    pub fn set_house(&mut self, amount: Amount) {
        self.house = Some(amount);
    }

    pub fn set_commission(&mut self, amount: Amount) {
        self.commission = Some(amount);
    }

    // The first read of a key is the one the decision rests on.

    pub fn expect_wager(&mut self, id: WagerId, wager: Option<Wager>) {
        if self.expected.wager(&id).is_none() {
            self.expected.wagers.push((id, wager));
        }
    }

    pub fn expect_balance(&mut self, who: Address, amount: Amount) {
        if self.expected.balance(&who).is_none() {
            self.expected.balances.push((who, amount));
        }
    }

    pub fn expect_house(&mut self, amount: Amount) {
        self.expected.house.get_or_insert(amount);
    }

    pub fn expect_commission(&mut self, amount: Option<Amount>) {
        self.expected.commission.get_or_insert(amount);
    }

    /// Refuse the commit if any expected value moved since it was read.
    pub(crate) fn check(&self, view: &dyn LedgerView) -> Result<()> {
        for (id, wager) in &self.expected.wagers {
            if view.wager(id)? != *wager {
                return Err(CoreError::conflict(format!("wager {} changed", id.short())));
            }
        }
        for (who, amount) in &self.expected.balances {
            if view.balance(who)? != *amount {
                return Err(CoreError::conflict(format!("balance of {} changed", who)));
            }
        }
        if let Some(house) = self.expected.house {
            if view.house()? != house {
                return Err(CoreError::conflict("house balance changed"));
            }
        }
        if let Some(commission) = self.expected.commission {
            if view.commission()? != commission {
                return Err(CoreError::conflict("commission changed"));
            }
        }
        Ok(())
    }

    /// Changeset that undoes `self` once `self` has been committed.
    ///
    /// Prior values come from the expectations where `self` has them, since
    /// a successful commit proves they were current. The undo in turn expects
    /// the values `self` wrote, so it cannot clobber a later operation.
    pub async fn snapshot(&self, store: &dyn LedgerStore) -> Result<Changeset> {
        let mut before = Changeset::new();
        for (id, wager) in &self.wagers {
            let prior = match self.expected.wager(id) {
                Some(prior) => prior.clone(),
                None => store.get(id).await?,
            };
            before.set_wager(*id, prior);
            before.expect_wager(*id, wager.clone());
        }
        for (who, amount) in &self.balances {
            let prior = match self.expected.balance(who) {
                Some(prior) => prior,
                None => store.balance_of(who).await?,
            };
            before.set_balance(*who, prior);
            before.expect_balance(*who, *amount);
        }
        if let Some(house) = self.house {
            let prior = match self.expected.house {
                Some(prior) => prior,
                None => store.house_balance().await?,
            };
            before.set_house(prior);
            before.expect_house(house);
        }
        if let Some(commission) = self.commission {
            let prior = match self.expected.commission {
                Some(prior) => prior,
                None => store.commission().await?,
            };
            // a commission is always seeded before anything can change it
            let prior = prior.ok_or_else(|| CoreError::internal("commission not initialised"))?;
            before.set_commission(prior);
            before.expect_commission(Some(commission));
        }
        Ok(before)
    }
}

const HOUSE_KEY: &str = "house";
const COMMISSION_KEY: &str = "commission";

/// SQLite-backed ledger.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        // other processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wagers (
                id TEXT PRIMARY KEY,
                amount INTEGER NOT NULL,
                expiry_at INTEGER NOT NULL,
                bettor TEXT NOT NULL,
                opponent TEXT NOT NULL,
                counter_choice INTEGER,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                address TEXT PRIMARY KEY,
                amount INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[async_trait]
impl LedgerStore for Storage {
    async fn get(&self, id: &WagerId) -> Result<Option<Wager>> {
        let conn = self.get_connection().await;
        WagerStore::new(&conn).load(id)
    }

    async fn put(&self, id: &WagerId, wager: &Wager) -> Result<()> {
        let conn = self.get_connection().await;
        WagerStore::new(&conn).save(id, wager)
    }

    async fn remove(&self, id: &WagerId) -> Result<()> {
        let conn = self.get_connection().await;
        WagerStore::new(&conn).delete(id)
    }

    async fn list(&self) -> Result<Vec<(WagerId, Wager)>> {
        let conn = self.get_connection().await;
        WagerStore::new(&conn).list()
    }

    async fn balance_of(&self, who: &Address) -> Result<Amount> {
        let conn = self.get_connection().await;
        BalanceStore::new(&conn).balance(who)
    }

    async fn house_balance(&self) -> Result<Amount> {
        let conn = self.get_connection().await;
        Ok(BalanceStore::new(&conn)
            .setting(HOUSE_KEY)?
            .unwrap_or(Amount::ZERO))
    }

    async fn commission(&self) -> Result<Option<Amount>> {
        let conn = self.get_connection().await;
        BalanceStore::new(&conn).setting(COMMISSION_KEY)
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        let mut conn = self.get_connection().await;
        // IMMEDIATE takes the database write lock before the checks run
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        changes.check(&SqliteView { conn: &tx })?;

        {
            let wagers = WagerStore::new(&tx);
            for (id, wager) in &changes.wagers {
                match wager {
                    Some(wager) => wagers.save(id, wager)?,
                    None => wagers.delete(id)?,
                }
            }

            let balances = BalanceStore::new(&tx);
            for (who, amount) in &changes.balances {
                balances.set_balance(who, *amount)?;
            }
            if let Some(house) = changes.house {
                balances.set_setting(HOUSE_KEY, house)?;
            }
            if let Some(commission) = changes.commission {
                balances.set_setting(COMMISSION_KEY, commission)?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "Committed {} wager and {} balance writes",
            changes.wagers.len(),
            changes.balances.len()
        );
        Ok(())
    }
}

struct SqliteView<'a> {
    conn: &'a Connection,
}

impl LedgerView for SqliteView<'_> {
    fn wager(&self, id: &WagerId) -> Result<Option<Wager>> {
        WagerStore::new(self.conn).load(id)
    }

    fn balance(&self, who: &Address) -> Result<Amount> {
        BalanceStore::new(self.conn).balance(who)
    }

    fn house(&self) -> Result<Amount> {
        Ok(BalanceStore::new(self.conn)
            .setting(HOUSE_KEY)?
            .unwrap_or(Amount::ZERO))
    }

    fn commission(&self) -> Result<Option<Amount>> {
        BalanceStore::new(self.conn).setting(COMMISSION_KEY)
    }
}

pub(crate) fn amount_to_sql(amount: Amount) -> Result<i64> {
    i64::try_from(amount.to_sat())
        .map_err(|_| CoreError::internal(format!("amount too large to store: {}", amount.to_sat())))
}

pub(crate) fn amount_from_sql(raw: i64) -> Result<Amount> {
    u64::try_from(raw)
        .map(Amount::from_sat)
        .map_err(|_| CoreError::corrupt(format!("negative amount: {}", raw)))
}
