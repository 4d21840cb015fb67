//! Timeout gate: after expiry exactly one side may pull the stake back,
//! decided by whether the wager was ever countered.

use crate::error::{Result, WagerError};
use rochambeau_core::{Address, Amount, Wager};

/// Which party the reclaim path is open to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimRight {
    /// The opponent never showed up.
    Bettor,
    /// The bettor never revealed.
    Opponent,
}

pub fn reclaim_right(wager: &Wager) -> ReclaimRight {
    if wager.is_countered() {
        ReclaimRight::Opponent
    } else {
        ReclaimRight::Bettor
    }
}

/// Approved reclaim: who gets paid, how much, and the closed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaim {
    pub claimant: Address,
    pub amount: Amount,
    pub closed: Wager,
}

fn live_record(wager: Option<&Wager>) -> Result<&Wager> {
    let wager = wager.ok_or(WagerError::WagerNotFound)?;
    if !wager.is_live() {
        return Err(WagerError::AlreadyResolved);
    }
    Ok(wager)
}

pub fn bettor_reclaim(wager: Option<&Wager>, caller: &Address, now: u64) -> Result<Reclaim> {
    let wager = live_record(wager)?;

    if wager.bettor != *caller {
        return Err(WagerError::OnlyBettorCanClaim);
    }

    if !wager.is_expired(now) {
        return Err(WagerError::NotYetExpired);
    }

    if reclaim_right(wager) != ReclaimRight::Bettor {
        return Err(WagerError::CounteredWager);
    }

    Ok(Reclaim {
        claimant: wager.bettor,
        amount: wager.amount,
        closed: wager.closed(),
    })
}

/// Pays out the bettor's net stake only; the opponent's own matching stake
/// stays with the escrow.
pub fn opponent_reclaim(wager: Option<&Wager>, caller: &Address, now: u64) -> Result<Reclaim> {
    let wager = live_record(wager)?;

    if wager.opponent != *caller {
        return Err(WagerError::OnlyOpponentCanClaim);
    }

    if !wager.is_expired(now) {
        return Err(WagerError::NotYetExpired);
    }

    if reclaim_right(wager) != ReclaimRight::Opponent {
        return Err(WagerError::OpponentHasNotCountered);
    }

    Ok(Reclaim {
        claimant: wager.opponent,
        amount: wager.amount,
        closed: wager.closed(),
    })
}
