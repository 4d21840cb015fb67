use rochambeau_core::{Address, Amount, Choice, WagerId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notifications emitted after an operation has fully succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WagerEvent {
    CommissionChanged {
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        old: Amount,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        new: Amount,
    },
    WagerPlaced {
        id: WagerId,
        bettor: Address,
        opponent: Address,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
        expiry_delta: u64,
    },
    WagerCountered {
        id: WagerId,
        opponent: Address,
        choice: Choice,
    },
    WagerVerified {
        id: WagerId,
        winner: Address,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
        bettor_choice: Choice,
        opponent_choice: Choice,
    },
    WagerTied {
        id: WagerId,
        bettor: Address,
        opponent: Address,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
        choice: Choice,
    },
    WagerReclaimed {
        id: WagerId,
        claimant: Address,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
    },
    Withdrawal {
        who: Address,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: WagerEvent);
}

/// Keeps every event in memory, oldest first.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<WagerEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WagerEvent> {
        self.events.lock().clone()
    }

    pub fn last(&self) -> Option<WagerEvent> {
        self.events.lock().last().cloned()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<WagerEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: WagerEvent) {
        self.events.lock().push(event);
    }
}
