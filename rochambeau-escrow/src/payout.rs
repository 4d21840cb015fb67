//! Payout mechanism. Both strategies sit behind [`PayoutStrategy`]; the
//! wager state machine does not know which one is in use.

use crate::config::PayoutMode;
use crate::error::{Result, WagerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rochambeau_core::{Address, Amount, Changeset, LedgerStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Value owed to one party by one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub to: Address,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
}

impl Credit {
    pub fn new(to: Address, amount: Amount) -> Self {
        Self { to, amount }
    }
}

/// A credit the rail refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undelivered {
    pub credit: Credit,
    pub reason: String,
}

/// Rail that moves value out of the escrow.
#[async_trait]
pub trait ValueTransfer: Send + Sync {
    async fn transfer(&self, to: &Address, amount: Amount) -> Result<()>;
}

/// Keeps every outgoing transfer in memory. Refuses transfers while offline.
#[derive(Debug, Default)]
pub struct RecordingTransfer {
    sent: Mutex<Vec<Credit>>,
    offline: AtomicBool,
}

impl RecordingTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Credit> {
        self.sent.lock().clone()
    }

    pub fn total_to(&self, who: &Address) -> Amount {
        self.sent
            .lock()
            .iter()
            .filter(|c| c.to == *who)
            .fold(Amount::ZERO, |acc, c| acc + c.amount)
    }
}

#[async_trait]
impl ValueTransfer for RecordingTransfer {
    async fn transfer(&self, to: &Address, amount: Amount) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(WagerError::transfer(format!("rail offline, {} not paid", to)));
        }
        self.sent.lock().push(Credit::new(*to, amount));
        Ok(())
    }
}

#[async_trait]
pub trait PayoutStrategy: Send + Sync {
    fn mode(&self) -> PayoutMode;

    /// Rail used when value finally leaves the escrow.
    fn rail(&self) -> &dyn ValueTransfer;

    /// Add whatever must land atomically with the wager update.
    async fn stage(
        &self,
        store: &dyn LedgerStore,
        credits: &[Credit],
        changes: &mut Changeset,
    ) -> Result<()>;

    /// Runs after the changeset is committed. Returns the credits that
    /// could not be delivered.
    async fn settle(&self, credits: &[Credit]) -> Vec<Undelivered>;
}

/// Add `credits` on top of the balances `changes` already holds. Balances
/// read from the store are recorded as expectations.
pub async fn credit_balances(
    store: &dyn LedgerStore,
    credits: &[Credit],
    changes: &mut Changeset,
) -> Result<()> {
    for credit in credits {
        let current = match changes.pending_balance(&credit.to) {
            Some(pending) => pending,
            None => {
                let stored = store.balance_of(&credit.to).await?;
                changes.expect_balance(credit.to, stored);
                stored
            }
        };
        let updated = current
            .checked_add(credit.amount)
            .ok_or(WagerError::Overflow)?;
        changes.set_balance(credit.to, updated);
    }
    Ok(())
}

/// Credits an internal balance; value leaves only through `withdraw`.
pub struct PullPayment {
    rail: Arc<dyn ValueTransfer>,
}

impl PullPayment {
    pub fn new(rail: Arc<dyn ValueTransfer>) -> Self {
        Self { rail }
    }
}

#[async_trait]
impl PayoutStrategy for PullPayment {
    fn mode(&self) -> PayoutMode {
        PayoutMode::Pull
    }

    fn rail(&self) -> &dyn ValueTransfer {
        self.rail.as_ref()
    }

    async fn stage(
        &self,
        store: &dyn LedgerStore,
        credits: &[Credit],
        changes: &mut Changeset,
    ) -> Result<()> {
        credit_balances(store, credits, changes).await
    }

    async fn settle(&self, _credits: &[Credit]) -> Vec<Undelivered> {
        Vec::new()
    }
}

/// Transfers straight to the parties once the record is closed.
pub struct PushPayment {
    rail: Arc<dyn ValueTransfer>,
}

impl PushPayment {
    pub fn new(rail: Arc<dyn ValueTransfer>) -> Self {
        Self { rail }
    }
}

#[async_trait]
impl PayoutStrategy for PushPayment {
    fn mode(&self) -> PayoutMode {
        PayoutMode::Push
    }

    fn rail(&self) -> &dyn ValueTransfer {
        self.rail.as_ref()
    }

    async fn stage(
        &self,
        _store: &dyn LedgerStore,
        _credits: &[Credit],
        _changes: &mut Changeset,
    ) -> Result<()> {
        Ok(())
    }

    async fn settle(&self, credits: &[Credit]) -> Vec<Undelivered> {
        let mut undelivered = Vec::new();
        for credit in credits {
            if let Err(e) = self.rail.transfer(&credit.to, credit.amount).await {
                undelivered.push(Undelivered {
                    credit: *credit,
                    reason: e.to_string(),
                });
            }
        }
        undelivered
    }
}

/// Strategy for `mode`, sharing one rail.
pub fn strategy_for(mode: PayoutMode, rail: Arc<dyn ValueTransfer>) -> Box<dyn PayoutStrategy> {
    match mode {
        PayoutMode::Pull => Box::new(PullPayment::new(rail)),
        PayoutMode::Push => Box::new(PushPayment::new(rail)),
    }
}
