//! Commit-reveal rock/paper/scissors wager escrow
//!
//! A bettor commits to a hidden hand by placing a deposit under a hash
//! identifier. A named opponent counters in the clear with a matching
//! deposit, and the bettor then reveals to settle. Whoever stalls past the
//! deadline forfeits the reclaim path to the other side.

pub mod commitment;
pub mod config;
pub mod error;
pub mod escrow;
pub mod events;
pub mod gate;
pub mod ledger;
pub mod payout;
pub mod reclaim;
pub mod resolution;

pub use commitment::{
    generate_secret, CommitmentBinding, CommitmentScheme, Opening, Secret, WagerCommitment,
};
pub use config::{EscrowConfig, PayoutMode};
pub use error::{Result, WagerError};
pub use escrow::{Collaborators, WagerEscrow};
pub use events::{EventLog, EventSink, WagerEvent};
pub use gate::{AccessGate, OwnerGate};
pub use payout::{
    Credit, PayoutStrategy, PullPayment, PushPayment, RecordingTransfer, ValueTransfer,
};
pub use reclaim::{Reclaim, ReclaimRight};
pub use resolution::{Outcome, Settlement};
