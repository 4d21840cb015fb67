//! Rochambeau core - shared types and ledger storage
//!
//! This crate holds the data model of the wager escrow (parties, commitment
//! identifiers, hands and wager records), the clock the escrow reads time
//! from, and the keyed ledger repository with in-memory and SQLite backends.

pub mod clock;
pub mod error;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use storage::{Changeset, Expectations, LedgerStore, MemoryStore, Storage};
pub use types::{Address, Choice, InvalidChoice, Wager, WagerId};

pub use ::bitcoin::Amount;
