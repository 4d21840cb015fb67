use super::{Changeset, LedgerStore, LedgerView};
use crate::error::Result;
use crate::types::{Address, Wager, WagerId};
use async_trait::async_trait;
use bitcoin::Amount;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct MemoryLedger {
    wagers: HashMap<WagerId, Wager>,
    balances: HashMap<Address, Amount>,
    house: Amount,
    commission: Option<Amount>,
}

impl LedgerView for MemoryLedger {
    fn wager(&self, id: &WagerId) -> Result<Option<Wager>> {
        Ok(self.wagers.get(id).cloned())
    }

    fn balance(&self, who: &Address) -> Result<Amount> {
        Ok(self.balances.get(who).copied().unwrap_or(Amount::ZERO))
    }

    fn house(&self) -> Result<Amount> {
        Ok(self.house)
    }

    fn commission(&self) -> Result<Option<Amount>> {
        Ok(self.commission)
    }
}

/// In-process ledger. A commit holds the write lock for the whole changeset.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryLedger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get(&self, id: &WagerId) -> Result<Option<Wager>> {
        Ok(self.inner.read().wagers.get(id).cloned())
    }

    async fn put(&self, id: &WagerId, wager: &Wager) -> Result<()> {
        self.inner.write().wagers.insert(*id, wager.clone());
        Ok(())
    }

    async fn remove(&self, id: &WagerId) -> Result<()> {
        self.inner.write().wagers.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(WagerId, Wager)>> {
        let ledger = self.inner.read();
        let mut wagers: Vec<(WagerId, Wager)> = ledger
            .wagers
            .iter()
            .map(|(id, wager)| (*id, wager.clone()))
            .collect();
        wagers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(wagers)
    }

    async fn balance_of(&self, who: &Address) -> Result<Amount> {
        Ok(self
            .inner
            .read()
            .balances
            .get(who)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn house_balance(&self) -> Result<Amount> {
        Ok(self.inner.read().house)
    }

    async fn commission(&self) -> Result<Option<Amount>> {
        Ok(self.inner.read().commission)
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        let mut ledger = self.inner.write();
        changes.check(&*ledger)?;

        for (id, wager) in &changes.wagers {
            match wager {
                Some(wager) => {
                    ledger.wagers.insert(*id, wager.clone());
                }
                None => {
                    ledger.wagers.remove(id);
                }
            }
        }
        for (who, amount) in &changes.balances {
            if *amount == Amount::ZERO {
                ledger.balances.remove(who);
            } else {
                ledger.balances.insert(*who, *amount);
            }
        }
        if let Some(house) = changes.house {
            ledger.house = house;
        }
        if let Some(commission) = changes.commission {
            ledger.commission = Some(commission);
        }

        Ok(())
    }
}
