//! Wager ledger transitions: opening a wager and countering it.
//!
//! These functions only decide; the escrow facade commits what they return.

use crate::error::{Result, WagerError};
use rochambeau_core::{Address, Amount, Choice, Wager};

/// Limits in force for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTerms {
    pub commission: Amount,
    pub max_expiry_delta: u64,
    pub extend_on_counter: bool,
    pub reject_expired_counter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceRequest {
    pub bettor: Address,
    pub opponent: Address,
    pub expiry_delta: u64,
    pub deposit: Amount,
}

/// Validate a placement against whatever is stored under its identifier
/// and build the new record.
pub fn open_wager(
    existing: Option<&Wager>,
    request: &PlaceRequest,
    terms: &LedgerTerms,
    now: u64,
) -> Result<Wager> {
    if request.deposit <= terms.commission {
        return Err(WagerError::CommissionUncovered);
    }

    if request.opponent.is_zero() {
        return Err(WagerError::NoOpponent);
    }

    if existing.map_or(false, Wager::is_live) {
        return Err(WagerError::DuplicateWager);
    }

    if request.expiry_delta > terms.max_expiry_delta {
        return Err(WagerError::ExpiryTooLarge);
    }

    let amount = request
        .deposit
        .checked_sub(terms.commission)
        .ok_or(WagerError::Overflow)?;
    let expiry_at = now
        .checked_add(request.expiry_delta)
        .ok_or(WagerError::Overflow)?;

    Ok(Wager::new(amount, expiry_at, request.bettor, request.opponent))
}

/// Deposit the opponent must match with.
pub fn counter_price(wager: &Wager, terms: &LedgerTerms) -> Result<Amount> {
    wager
        .amount
        .checked_add(terms.commission)
        .ok_or(WagerError::Overflow)
}

/// Validate a counter and return the countered record.
pub fn counter_wager(
    existing: Option<&Wager>,
    caller: &Address,
    choice: Choice,
    deposit: Amount,
    terms: &LedgerTerms,
    now: u64,
) -> Result<Wager> {
    let wager = existing.ok_or(WagerError::NotOpponent)?;

    // checked before identity so every caller sees the same answer
    if wager.is_countered() {
        return Err(WagerError::AlreadyCountered);
    }

    if wager.opponent != *caller || !wager.is_live() {
        return Err(WagerError::NotOpponent);
    }

    if deposit != counter_price(wager, terms)? {
        return Err(WagerError::AmountMismatch);
    }

    if terms.reject_expired_counter && wager.is_expired(now) {
        return Err(WagerError::WagerExpired);
    }

    let mut countered = wager.clone();
    countered.counter_choice = Some(choice);
    if terms.extend_on_counter {
        countered.expiry_at = countered
            .expiry_at
            .checked_add(terms.max_expiry_delta)
            .ok_or(WagerError::Overflow)?;
    }

    Ok(countered)
}
