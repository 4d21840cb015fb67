use crate::commitment::{CommitmentBinding, Secret, WagerCommitment};
use crate::config::{EscrowConfig, PayoutMode};
use crate::error::{Result, WagerError};
use crate::events::{EventSink, WagerEvent};
use crate::gate::AccessGate;
use crate::ledger::{self, LedgerTerms, PlaceRequest};
use crate::payout::{credit_balances, strategy_for, Credit, PayoutStrategy, ValueTransfer};
use crate::reclaim::{self, Reclaim, ReclaimRight};
use crate::resolution::{self, Outcome, Settlement};
use rochambeau_core::{
    Address, Amount, Changeset, Choice, Clock, CoreError, LedgerStore, Wager, WagerId,
};
use std::future::Future;
use std::sync::Arc;

/// How often an operation is re-decided after losing a race on the ledger.
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Everything the escrow depends on but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn LedgerStore>,
    pub clock: Arc<dyn Clock>,
    pub gate: Arc<dyn AccessGate>,
    pub rail: Arc<dyn ValueTransfer>,
    pub events: Arc<dyn EventSink>,
}

/// Commit-reveal rock/paper/scissors escrow.
///
/// Every operation reads the clock once, checks all of its preconditions,
/// commits one [`Changeset`] and only then moves value. The changeset
/// carries the values the decision was made on, so when several escrows
/// share a ledger (another process on the same database, or a cloned
/// [`Collaborators`]) a commit built on stale reads is refused by the store
/// and the operation is decided again against the fresh state. The loser of
/// a race therefore sees the winner's effect, e.g. `AlreadyCountered`.
///
/// Mutating operations take `&mut self`, so a payout can never re-enter
/// the escrow.
pub struct WagerEscrow {
    config: EscrowConfig,
    codec: WagerCommitment,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    gate: Arc<dyn AccessGate>,
    payout: Box<dyn PayoutStrategy>,
    events: Arc<dyn EventSink>,
}

fn rejected(op: &str, err: WagerError) -> WagerError {
    tracing::debug!("{} rejected: {}", op, err);
    err
}

fn is_conflict(err: &WagerError) -> bool {
    matches!(err, WagerError::Core(e) if e.is_conflict())
}

/// Run one decide-and-commit attempt until it is not refused as stale.
async fn retry_on_conflict<T, F, Fut>(op: &str, mut attempt_once: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match attempt_once().await {
            Err(e) if is_conflict(&e) && attempt < MAX_COMMIT_ATTEMPTS => {
                tracing::debug!(
                    "{} raced another writer ({}), deciding again ({}/{})",
                    op,
                    e,
                    attempt,
                    MAX_COMMIT_ATTEMPTS
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

impl WagerEscrow {
    pub async fn new(config: EscrowConfig, deps: Collaborators) -> Result<Self> {
        config.validate()?;

        if deps.store.commission().await?.is_none() {
            let mut seed = Changeset::new();
            seed.expect_commission(None);
            seed.set_commission(config.commission);
            match deps.store.commit(&seed).await {
                Ok(()) => tracing::info!(
                    "Seeded commission of {} sats for escrow {}",
                    config.commission.to_sat(),
                    config.instance
                ),
                // someone else seeded it first
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            codec: WagerCommitment::new(config.instance, config.binding),
            payout: strategy_for(config.payout, deps.rail),
            config,
            store: deps.store,
            clock: deps.clock,
            gate: deps.gate,
            events: deps.events,
        })
    }

    /// Replace the payout strategy chosen from the configuration.
    pub fn with_payout(mut self, payout: Box<dyn PayoutStrategy>) -> Self {
        self.payout = payout;
        self
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn instance(&self) -> Address {
        self.config.instance
    }

    pub fn binding(&self) -> CommitmentBinding {
        self.codec.binding()
    }

    pub fn payout_mode(&self) -> PayoutMode {
        self.payout.mode()
    }

    pub fn max_expiry_delta(&self) -> u64 {
        self.config.max_expiry_delta
    }

    /// Identifier a bettor places under. Pure; reveals nothing without the secret.
    pub fn commit(&self, choice: Choice, secret: &Secret, committer: &Address) -> WagerId {
        self.codec.derive(choice, secret, committer)
    }

    pub async fn commission(&self) -> Result<Amount> {
        Ok(self
            .store
            .commission()
            .await?
            .unwrap_or(self.config.commission))
    }

    pub async fn wager(&self, id: &WagerId) -> Result<Option<Wager>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn wagers(&self) -> Result<Vec<(WagerId, Wager)>> {
        Ok(self.store.list().await?)
    }

    pub async fn balance_of(&self, who: &Address) -> Result<Amount> {
        Ok(self.store.balance_of(who).await?)
    }

    pub async fn house_balance(&self) -> Result<Amount> {
        Ok(self.store.house_balance().await?)
    }

    async fn read_wager(&self, id: &WagerId, changes: &mut Changeset) -> Result<Option<Wager>> {
        let wager = self.store.get(id).await?;
        changes.expect_wager(*id, wager.clone());
        Ok(wager)
    }

    async fn terms(&self, changes: &mut Changeset) -> Result<LedgerTerms> {
        let stored = self.store.commission().await?;
        changes.expect_commission(stored);
        Ok(LedgerTerms {
            commission: stored.unwrap_or(self.config.commission),
            max_expiry_delta: self.config.max_expiry_delta,
            extend_on_counter: self.config.extend_on_counter,
            reject_expired_counter: self.config.reject_expired_counter,
        })
    }

    async fn collect_commission(&self, commission: Amount, changes: &mut Changeset) -> Result<()> {
        let current = self.store.house_balance().await?;
        changes.expect_house(current);
        let house = current
            .checked_add(commission)
            .ok_or(WagerError::Overflow)?;
        changes.set_house(house);
        Ok(())
    }

    fn emit(&self, event: WagerEvent) {
        self.events.emit(event);
    }

    /// Commit `changes` together with the staged credits, then pay out.
    ///
    /// A conflict can only come from the first commit, before any value
    /// moved. If nothing could be delivered the commit is undone. If only
    /// some credits were refused they fall back to withdrawable balances.
    async fn commit_and_pay(&self, mut changes: Changeset, credits: &[Credit]) -> Result<()> {
        self.payout
            .stage(self.store.as_ref(), credits, &mut changes)
            .await?;

        let before = changes.snapshot(self.store.as_ref()).await?;
        self.store.commit(&changes).await?;

        let undelivered = self.payout.settle(credits).await;
        if undelivered.is_empty() {
            return Ok(());
        }

        let reason = undelivered[0].reason.clone();
        if undelivered.len() == credits.len() {
            tracing::warn!("No payout could be delivered, restoring ledger: {}", reason);
            if let Err(e) = self.store.commit(&before).await {
                return Err(WagerError::transfer(format!(
                    "{}; ledger restore failed: {}",
                    reason, e
                )));
            }
            return Err(WagerError::transfer(reason));
        }

        let refused: Vec<Credit> = undelivered.iter().map(|u| u.credit).collect();
        retry_on_conflict("payout fallback", || self.credit_refused(&refused))
            .await
            .map_err(|e| match e {
                WagerError::Core(core) if core.is_conflict() => WagerError::Core(
                    CoreError::internal(format!("refused payouts not credited: {}", core)),
                ),
                other => other,
            })?;
        for u in &undelivered {
            tracing::warn!(
                "Transfer of {} sats to {} refused ({}), credited for withdrawal",
                u.credit.amount.to_sat(),
                u.credit.to,
                u.reason
            );
        }
        Ok(())
    }

    async fn credit_refused(&self, refused: &[Credit]) -> Result<()> {
        let mut fallback = Changeset::new();
        credit_balances(self.store.as_ref(), refused, &mut fallback).await?;
        self.store.commit(&fallback).await?;
        Ok(())
    }

    async fn try_place(&self, id: &WagerId, request: &PlaceRequest, now: u64) -> Result<Wager> {
        let mut changes = Changeset::new();
        let terms = self.terms(&mut changes).await?;
        let existing = self.read_wager(id, &mut changes).await?;
        let wager = ledger::open_wager(existing.as_ref(), request, &terms, now)
            .map_err(|e| rejected("place", e))?;

        changes.put_wager(*id, wager.clone());
        self.collect_commission(terms.commission, &mut changes)
            .await?;
        self.store.commit(&changes).await?;
        Ok(wager)
    }

    /// Open a wager under `id` with `deposit`, of which the commission is kept.
    pub async fn place(
        &mut self,
        caller: &Address,
        id: &WagerId,
        expiry_delta: u64,
        opponent: &Address,
        deposit: Amount,
    ) -> Result<Wager> {
        let now = self.clock.now();
        self.gate
            .ensure_active()
            .map_err(|e| rejected("place", e))?;

        let request = PlaceRequest {
            bettor: *caller,
            opponent: *opponent,
            expiry_delta,
            deposit,
        };
        let wager = retry_on_conflict("place", || self.try_place(id, &request, now)).await?;

        tracing::info!(
            "Wager {} placed by {} against {} for {} sats, expires at {}",
            id.short(),
            caller,
            opponent,
            wager.amount.to_sat(),
            wager.expiry_at
        );
        self.emit(WagerEvent::WagerPlaced {
            id: *id,
            bettor: *caller,
            opponent: *opponent,
            amount: wager.amount,
            expiry_delta,
        });

        Ok(wager)
    }

    async fn try_counter(
        &self,
        caller: &Address,
        id: &WagerId,
        choice: Choice,
        deposit: Amount,
        now: u64,
    ) -> Result<Wager> {
        let mut changes = Changeset::new();
        let terms = self.terms(&mut changes).await?;
        let existing = self.read_wager(id, &mut changes).await?;
        let wager = ledger::counter_wager(existing.as_ref(), caller, choice, deposit, &terms, now)
            .map_err(|e| rejected("counter", e))?;

        changes.put_wager(*id, wager.clone());
        self.collect_commission(terms.commission, &mut changes)
            .await?;
        self.store.commit(&changes).await?;
        Ok(wager)
    }

    /// Match the stake under `id` with a plaintext `choice`.
    pub async fn counter(
        &mut self,
        caller: &Address,
        id: &WagerId,
        choice: Choice,
        deposit: Amount,
    ) -> Result<Wager> {
        let now = self.clock.now();
        self.gate
            .ensure_active()
            .map_err(|e| rejected("counter", e))?;

        let wager = retry_on_conflict("counter", || {
            self.try_counter(caller, id, choice, deposit, now)
        })
        .await?;

        tracing::info!(
            "Wager {} countered by {} with {}, reveal due by {}",
            id.short(),
            caller,
            choice,
            wager.expiry_at
        );
        self.emit(WagerEvent::WagerCountered {
            id: *id,
            opponent: *caller,
            choice,
        });

        Ok(wager)
    }

    async fn try_verify(
        &self,
        caller: &Address,
        id: &WagerId,
        choice: Choice,
        now: u64,
    ) -> Result<Settlement> {
        let mut changes = Changeset::new();
        let existing = self.read_wager(id, &mut changes).await?;
        let settlement =
            resolution::settle(existing.as_ref(), choice, now).map_err(|e| rejected("verify", e))?;
        if settlement.bettor != *caller {
            return Err(rejected("verify", WagerError::NotBettor));
        }

        changes.put_wager(*id, settlement.closed.clone());
        self.commit_and_pay(changes, &settlement.credits).await?;
        Ok(settlement)
    }

    /// Reveal the bettor's hand and settle the wager.
    pub async fn verify(
        &mut self,
        caller: &Address,
        choice: Choice,
        secret: &Secret,
    ) -> Result<Settlement> {
        let now = self.clock.now();
        self.gate
            .ensure_active()
            .map_err(|e| rejected("verify", e))?;

        let id = self.commit(choice, secret, caller);
        let settlement =
            retry_on_conflict("verify", || self.try_verify(caller, &id, choice, now)).await?;

        match settlement.outcome {
            Outcome::Tie => {
                tracing::info!(
                    "Wager {} tied on {}, {} sats back to each side",
                    id.short(),
                    choice,
                    settlement.amount.to_sat()
                );
                self.emit(WagerEvent::WagerTied {
                    id,
                    bettor: settlement.bettor,
                    opponent: settlement.opponent,
                    amount: settlement.amount,
                    choice,
                });
            }
            Outcome::BettorWins | Outcome::OpponentWins => {
                let winner = settlement.winner().unwrap_or(settlement.bettor);
                let (beater, beaten) = if settlement.outcome == Outcome::BettorWins {
                    (settlement.bettor_choice, settlement.opponent_choice)
                } else {
                    (settlement.opponent_choice, settlement.bettor_choice)
                };
                tracing::info!(
                    "Wager {} verified: {} beats {}, {} wins {} sats",
                    id.short(),
                    beater,
                    beaten,
                    winner,
                    settlement.amount.to_sat() * 2
                );
                self.emit(WagerEvent::WagerVerified {
                    id,
                    winner,
                    amount: settlement.amount,
                    bettor_choice: settlement.bettor_choice,
                    opponent_choice: settlement.opponent_choice,
                });
            }
        }

        Ok(settlement)
    }

    async fn try_reclaim(
        &self,
        right: ReclaimRight,
        caller: &Address,
        id: &WagerId,
        now: u64,
    ) -> Result<Reclaim> {
        let mut changes = Changeset::new();
        let existing = self.read_wager(id, &mut changes).await?;
        let reclaim = match right {
            ReclaimRight::Bettor => reclaim::bettor_reclaim(existing.as_ref(), caller, now)
                .map_err(|e| rejected("bettor reclaim", e))?,
            ReclaimRight::Opponent => reclaim::opponent_reclaim(existing.as_ref(), caller, now)
                .map_err(|e| rejected("opponent reclaim", e))?,
        };

        changes.put_wager(*id, reclaim.closed.clone());
        let credits = [Credit::new(reclaim.claimant, reclaim.amount)];
        self.commit_and_pay(changes, &credits).await?;
        Ok(reclaim)
    }

    async fn reclaim_stake(
        &mut self,
        right: ReclaimRight,
        caller: &Address,
        id: &WagerId,
    ) -> Result<Amount> {
        let now = self.clock.now();
        self.gate
            .ensure_active()
            .map_err(|e| rejected("reclaim", e))?;

        let reclaim =
            retry_on_conflict("reclaim", || self.try_reclaim(right, caller, id, now)).await?;

        tracing::info!(
            "Wager {} reclaimed by {} for {} sats",
            id.short(),
            reclaim.claimant,
            reclaim.amount.to_sat()
        );
        self.emit(WagerEvent::WagerReclaimed {
            id: *id,
            claimant: reclaim.claimant,
            amount: reclaim.amount,
        });

        Ok(reclaim.amount)
    }

    /// Bettor recovers the stake of an expired wager nobody countered,
    /// proving the wager by reopening its commitment.
    pub async fn bettor_reclaim(
        &mut self,
        caller: &Address,
        choice: Choice,
        secret: &Secret,
    ) -> Result<Amount> {
        let id = self.commit(choice, secret, caller);
        self.reclaim_stake(ReclaimRight::Bettor, caller, &id).await
    }

    /// Same as [`WagerEscrow::bettor_reclaim`] for a caller who is the stored
    /// bettor of `id`. Covers wagers placed under a commitment the placer
    /// cannot reopen from their own address.
    pub async fn bettor_reclaim_by_id(
        &mut self,
        caller: &Address,
        id: &WagerId,
    ) -> Result<Amount> {
        self.reclaim_stake(ReclaimRight::Bettor, caller, id).await
    }

    /// Opponent collects the bettor's stake when the reveal never came.
    pub async fn opponent_reclaim(&mut self, caller: &Address, id: &WagerId) -> Result<Amount> {
        self.reclaim_stake(ReclaimRight::Opponent, caller, id).await
    }

    async fn try_debit(&self, caller: &Address, amount: Amount) -> Result<Changeset> {
        let available = self.store.balance_of(caller).await?;
        let remaining = available.checked_sub(amount).ok_or_else(|| {
            rejected(
                "withdraw",
                WagerError::InsufficientBalance {
                    need: amount.to_sat(),
                    available: available.to_sat(),
                },
            )
        })?;

        let mut changes = Changeset::new();
        changes.expect_balance(*caller, available);
        changes.set_balance(*caller, remaining);
        let before = changes.snapshot(self.store.as_ref()).await?;
        self.store.commit(&changes).await?;
        Ok(before)
    }

    /// Drain part of the caller's credited balance through the rail.
    pub async fn withdraw(&mut self, caller: &Address, amount: Amount) -> Result<()> {
        self.gate
            .ensure_active()
            .map_err(|e| rejected("withdraw", e))?;

        let before = retry_on_conflict("withdraw", || self.try_debit(caller, amount)).await?;

        if let Err(e) = self.payout.rail().transfer(caller, amount).await {
            tracing::warn!("Withdrawal by {} failed, restoring balance: {}", caller, e);
            if let Err(restore) = self.store.commit(&before).await {
                return Err(WagerError::transfer(format!(
                    "{}; balance restore failed: {}",
                    e, restore
                )));
            }
            return Err(e);
        }

        tracing::info!("{} withdrew {} sats", caller, amount.to_sat());
        self.emit(WagerEvent::Withdrawal {
            who: *caller,
            amount,
        });
        Ok(())
    }

    async fn try_set_commission(&self, commission: Amount) -> Result<Amount> {
        let stored = self.store.commission().await?;
        let mut changes = Changeset::new();
        changes.expect_commission(stored);
        changes.set_commission(commission);
        self.store.commit(&changes).await?;
        Ok(stored.unwrap_or(self.config.commission))
    }

    /// Administrative: set the commission charged on future deposits.
    pub async fn change_commission(&mut self, caller: &Address, commission: Amount) -> Result<()> {
        self.gate
            .ensure_active()
            .map_err(|e| rejected("change commission", e))?;
        self.gate
            .ensure_authorized(caller)
            .map_err(|e| rejected("change commission", e))?;

        let old = retry_on_conflict("change commission", || {
            self.try_set_commission(commission)
        })
        .await?;

        tracing::info!(
            "Commission changed from {} to {} sats by {}",
            old.to_sat(),
            commission.to_sat(),
            caller
        );
        self.emit(WagerEvent::CommissionChanged {
            old,
            new: commission,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::generate_secret;
    use crate::events::EventLog;
    use crate::gate::OwnerGate;
    use crate::payout::RecordingTransfer;
    use async_trait::async_trait;
    use rochambeau_core::{ManualClock, MemoryStore, Storage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const OWNER: Address = Address::new([0x01; 20]);
    const PLAYER1: Address = Address::new([0xa1; 20]);
    const PLAYER2: Address = Address::new([0xb2; 20]);
    const STRANGER: Address = Address::new([0xcc; 20]);
    const START: u64 = 1_700_000_000;

    fn sats(n: u64) -> Amount {
        Amount::from_sat(n)
    }

    struct Harness {
        escrow: WagerEscrow,
        store: Arc<dyn LedgerStore>,
        clock: Arc<ManualClock>,
        gate: Arc<OwnerGate>,
        rail: Arc<RecordingTransfer>,
        events: Arc<EventLog>,
    }

    async fn harness_with(config: EscrowConfig, store: Arc<dyn LedgerStore>) -> Harness {
        let clock = Arc::new(ManualClock::new(START));
        let gate = Arc::new(OwnerGate::new(OWNER));
        let rail = Arc::new(RecordingTransfer::new());
        let events = Arc::new(EventLog::new());

        let escrow = WagerEscrow::new(
            config,
            Collaborators {
                store: store.clone(),
                clock: clock.clone(),
                gate: gate.clone(),
                rail: rail.clone(),
                events: events.clone(),
            },
        )
        .await
        .unwrap();

        Harness {
            escrow,
            store,
            clock,
            gate,
            rail,
            events,
        }
    }

    async fn harness(config: EscrowConfig) -> Harness {
        harness_with(config, Arc::new(MemoryStore::new())).await
    }

    fn default_config() -> EscrowConfig {
        EscrowConfig::new(Address::new([0x52; 20]))
            .with_commission(sats(10_000))
            .with_max_expiry_delta(600)
    }

    /// Scenario A setup: player1 places 11 000 against player2.
    async fn place_default(h: &mut Harness, choice: Choice) -> (WagerId, Secret) {
        let secret = generate_secret();
        let id = h.escrow.commit(choice, &secret, &PLAYER1);
        h.escrow
            .place(&PLAYER1, &id, 60, &PLAYER2, sats(11_000))
            .await
            .unwrap();
        (id, secret)
    }

    #[tokio::test]
    async fn test_scenario_a_place_records_net_amount() {
        let mut h = harness(default_config()).await;
        let (id, _) = place_default(&mut h, Choice::Rock).await;

        let wager = h.escrow.wager(&id).await.unwrap().unwrap();
        assert_eq!(wager.amount, sats(1000));
        assert_eq!(wager.expiry_at, START + 60);
        assert_eq!(wager.opponent, PLAYER2);
        assert_eq!(wager.counter_choice, None);
        assert_eq!(h.escrow.house_balance().await.unwrap(), sats(10_000));
        assert_eq!(
            h.events.last(),
            Some(WagerEvent::WagerPlaced {
                id,
                bettor: PLAYER1,
                opponent: PLAYER2,
                amount: sats(1000),
                expiry_delta: 60,
            })
        );
    }

    #[tokio::test]
    async fn test_scenario_b_tie_credits_both() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Paper).await;

        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        let settlement = h
            .escrow
            .verify(&PLAYER1, Choice::Paper, &secret)
            .await
            .unwrap();

        assert_eq!(settlement.outcome, Outcome::Tie);
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(1000));
        assert_eq!(h.escrow.balance_of(&PLAYER2).await.unwrap(), sats(1000));
        assert!(matches!(h.events.last(), Some(WagerEvent::WagerTied { .. })));
    }

    #[tokio::test]
    async fn test_scenario_c_bettor_wins() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        h.escrow
            .counter(&PLAYER2, &id, Choice::Scissors, sats(11_000))
            .await
            .unwrap();
        let settlement = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        assert_eq!(settlement.outcome, Outcome::BettorWins);
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(2000));
        assert_eq!(h.escrow.balance_of(&PLAYER2).await.unwrap(), Amount::ZERO);
        assert_eq!(
            h.events.last(),
            Some(WagerEvent::WagerVerified {
                id,
                winner: PLAYER1,
                amount: sats(1000),
                bettor_choice: Choice::Rock,
                opponent_choice: Choice::Scissors,
            })
        );

        let closed = h.escrow.wager(&id).await.unwrap().unwrap();
        assert_eq!(closed.amount, Amount::ZERO);
        assert_eq!(closed.opponent, Address::ZERO);
        assert_eq!(closed.counter_choice, None);
    }

    #[tokio::test]
    async fn test_scenario_d_opponent_wins() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        let settlement = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        assert_eq!(settlement.outcome, Outcome::OpponentWins);
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), Amount::ZERO);
        assert_eq!(h.escrow.balance_of(&PLAYER2).await.unwrap(), sats(2000));
    }

    #[tokio::test]
    async fn test_scenario_e_bettor_reclaims_uncountered() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        let err = h
            .escrow
            .bettor_reclaim(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::NotYetExpired));

        h.clock.advance(601);
        let err = h.escrow.opponent_reclaim(&PLAYER2, &id).await.unwrap_err();
        assert!(matches!(err, WagerError::OpponentHasNotCountered));

        let amount = h
            .escrow
            .bettor_reclaim(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();
        assert_eq!(amount, sats(1000));
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(1000));
        assert_eq!(
            h.events.last(),
            Some(WagerEvent::WagerReclaimed {
                id,
                claimant: PLAYER1,
                amount: sats(1000),
            })
        );

        let err = h
            .escrow
            .bettor_reclaim(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::AlreadyResolved));
    }

    #[tokio::test]
    async fn test_scenario_f_opponent_reclaims_after_reveal_window() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        let countered = h
            .escrow
            .counter(&PLAYER2, &id, Choice::Scissors, sats(11_000))
            .await
            .unwrap();
        assert_eq!(countered.expiry_at, START + 60 + 600);

        // still inside the reveal window
        h.clock.advance(601);
        let err = h.escrow.opponent_reclaim(&PLAYER2, &id).await.unwrap_err();
        assert!(matches!(err, WagerError::NotYetExpired));

        h.clock.advance(60);
        let err = h
            .escrow
            .bettor_reclaim(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::CounteredWager));
        let err = h.escrow.opponent_reclaim(&STRANGER, &id).await.unwrap_err();
        assert!(matches!(err, WagerError::OnlyOpponentCanClaim));

        let amount = h.escrow.opponent_reclaim(&PLAYER2, &id).await.unwrap();
        assert_eq!(amount, sats(1000));
        assert_eq!(h.escrow.balance_of(&PLAYER2).await.unwrap(), sats(1000));

        // reveal is too late now
        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::InvalidOrExpiredWager));
    }

    #[tokio::test]
    async fn test_verify_rejections() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        // wrong choice recomputes to an unknown identifier
        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Paper, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::InvalidOrExpiredWager));

        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::OpponentHasNotCountered));

        h.escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap();
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::AlreadyResolved));
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(1000));
    }

    #[tokio::test]
    async fn test_duplicate_and_fresh_placement() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        let err = h
            .escrow
            .place(&PLAYER1, &id, 60, &PLAYER2, sats(11_000))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::DuplicateWager));

        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        let fresh = h.escrow.commit(Choice::Rock, &generate_secret(), &PLAYER1);
        assert_ne!(fresh, id);
        let wager = h
            .escrow
            .place(&PLAYER1, &fresh, 600, &PLAYER2, sats(15_000))
            .await
            .unwrap();
        assert_eq!(wager.amount, sats(5000));
    }

    #[tokio::test]
    async fn test_second_counter_fails_for_everyone() {
        let mut h = harness(default_config()).await;
        let (id, _) = place_default(&mut h, Choice::Rock).await;

        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();

        for caller in [PLAYER2, PLAYER1, STRANGER] {
            let err = h
                .escrow
                .counter(&caller, &id, Choice::Rock, sats(11_000))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "AlreadyCountered");
        }
        assert_eq!(h.escrow.house_balance().await.unwrap(), sats(20_000));
    }

    #[tokio::test]
    async fn test_value_is_conserved() {
        let mut h = harness(default_config()).await;

        let mut deposited = 0u64;
        for (bettor_choice, opponent_choice) in [
            (Choice::Rock, Choice::Rock),
            (Choice::Rock, Choice::Scissors),
            (Choice::Scissors, Choice::Rock),
        ] {
            let secret = generate_secret();
            let id = h.escrow.commit(bettor_choice, &secret, &PLAYER1);
            h.escrow
                .place(&PLAYER1, &id, 60, &PLAYER2, sats(11_000))
                .await
                .unwrap();
            h.escrow
                .counter(&PLAYER2, &id, opponent_choice, sats(11_000))
                .await
                .unwrap();
            h.escrow
                .verify(&PLAYER1, bettor_choice, &secret)
                .await
                .unwrap();
            deposited += 22_000;
        }

        let paid = h.escrow.balance_of(&PLAYER1).await.unwrap()
            + h.escrow.balance_of(&PLAYER2).await.unwrap();
        let house = h.escrow.house_balance().await.unwrap();
        assert_eq!(paid, sats(6000));
        assert_eq!(paid + house, sats(deposited));
    }

    #[tokio::test]
    async fn test_paused_escrow_rejects_everything_mutating() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;
        h.events.drain();

        h.gate.pause(&OWNER).unwrap();

        let fresh = h.escrow.commit(Choice::Paper, &generate_secret(), &PLAYER1);
        let err = h
            .escrow
            .place(&PLAYER1, &fresh, 60, &PLAYER2, sats(11_000))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::SystemPaused));

        let err = h
            .escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::SystemPaused));

        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::SystemPaused));

        let err = h.escrow.withdraw(&PLAYER1, Amount::ZERO).await.unwrap_err();
        assert!(matches!(err, WagerError::SystemPaused));

        assert_eq!(h.escrow.wager(&fresh).await.unwrap(), None);
        assert!(h.events.events().is_empty());

        h.gate.resume(&OWNER).unwrap();
        h.escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_change_commission() {
        let mut h = harness(default_config()).await;

        let err = h
            .escrow
            .change_commission(&STRANGER, sats(500))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::Unauthorized));

        let (id, _) = place_default(&mut h, Choice::Rock).await;
        h.escrow
            .change_commission(&OWNER, sats(500))
            .await
            .unwrap();
        assert_eq!(h.escrow.commission().await.unwrap(), sats(500));
        assert_eq!(
            h.events.last(),
            Some(WagerEvent::CommissionChanged {
                old: sats(10_000),
                new: sats(500),
            })
        );

        // the counter price follows the current commission
        let err = h
            .escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::AmountMismatch));
        h.escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(1_500))
            .await
            .unwrap();

        let err = h
            .escrow
            .place(&PLAYER1, &WagerId::new([4u8; 32]), 60, &PLAYER2, sats(500))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::CommissionUncovered));
    }

    #[tokio::test]
    async fn test_withdraw_drains_pull_balance() {
        let mut h = harness(default_config()).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;
        h.escrow
            .counter(&PLAYER2, &id, Choice::Scissors, sats(11_000))
            .await
            .unwrap();
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();
        assert!(h.rail.sent().is_empty());

        h.escrow.withdraw(&PLAYER1, sats(1500)).await.unwrap();
        assert_eq!(h.rail.total_to(&PLAYER1), sats(1500));
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(500));

        let err = h.escrow.withdraw(&PLAYER1, sats(600)).await.unwrap_err();
        assert!(matches!(
            err,
            WagerError::InsufficientBalance {
                need: 600,
                available: 500
            }
        ));

        h.rail.set_offline(true);
        let err = h.escrow.withdraw(&PLAYER1, sats(500)).await.unwrap_err();
        assert!(matches!(err, WagerError::TransferFailed(_)));
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(500));
        assert!(matches!(h.events.last(), Some(WagerEvent::Withdrawal { .. })));
    }

    #[tokio::test]
    async fn test_push_payout_transfers_directly() {
        let mut h = harness(default_config().with_payout(PayoutMode::Push)).await;
        assert_eq!(h.escrow.payout_mode(), PayoutMode::Push);
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        h.escrow
            .counter(&PLAYER2, &id, Choice::Scissors, sats(11_000))
            .await
            .unwrap();
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        assert_eq!(h.rail.sent(), vec![Credit::new(PLAYER1, sats(2000))]);
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_push_failure_restores_wager() {
        let mut h = harness(default_config().with_payout(PayoutMode::Push)).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;
        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        h.events.drain();

        h.rail.set_offline(true);
        let err = h
            .escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::TransferFailed(_)));

        let wager = h.escrow.wager(&id).await.unwrap().unwrap();
        assert_eq!(wager.amount, sats(1000));
        assert_eq!(wager.counter_choice, Some(Choice::Paper));
        assert!(h.events.events().is_empty());

        h.rail.set_offline(false);
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();
        assert_eq!(h.rail.total_to(&PLAYER2), sats(2000));
    }

    /// Rail that refuses one address.
    struct RefusingRail {
        refuse: Address,
        inner: RecordingTransfer,
    }

    #[async_trait]
    impl ValueTransfer for RefusingRail {
        async fn transfer(&self, to: &Address, amount: Amount) -> Result<()> {
            if *to == self.refuse {
                return Err(WagerError::transfer("recipient rejected value"));
            }
            self.inner.transfer(to, amount).await
        }
    }

    #[tokio::test]
    async fn test_partially_refused_push_falls_back_to_balance() {
        let mut h = harness(default_config()).await;
        let rail = Arc::new(RefusingRail {
            refuse: PLAYER2,
            inner: RecordingTransfer::new(),
        });
        h.escrow = h
            .escrow
            .with_payout(Box::new(crate::payout::PushPayment::new(rail.clone())));

        let (id, secret) = place_default(&mut h, Choice::Rock).await;
        h.escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap();
        h.escrow
            .verify(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap();

        assert_eq!(rail.inner.total_to(&PLAYER1), sats(1000));
        assert_eq!(h.escrow.balance_of(&PLAYER2).await.unwrap(), sats(1000));
        assert!(!h.escrow.wager(&id).await.unwrap().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_instance_binding_requires_stored_bettor() {
        let config = default_config().with_binding(CommitmentBinding::Instance);
        let mut h = harness(config).await;
        let (id, secret) = place_default(&mut h, Choice::Rock).await;

        // anyone can recompute the identifier, only the placer may use it
        assert_eq!(h.escrow.commit(Choice::Rock, &secret, &STRANGER), id);

        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        let err = h
            .escrow
            .verify(&STRANGER, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::NotBettor));

        let (_, other_secret) = place_default(&mut h, Choice::Scissors).await;
        h.clock.advance(61);
        let err = h
            .escrow
            .bettor_reclaim(&STRANGER, Choice::Scissors, &other_secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::OnlyBettorCanClaim));
        h.escrow
            .bettor_reclaim(&PLAYER1, Choice::Scissors, &other_secret)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_variant_without_reveal_window() {
        let config = EscrowConfig::without_reveal_window(Address::new([0x52; 20]));
        let mut h = harness(config).await;
        let (id, _) = place_default(&mut h, Choice::Rock).await;

        h.clock.advance(120);
        let countered = h
            .escrow
            .counter(&PLAYER2, &id, Choice::Rock, sats(11_000))
            .await
            .unwrap();
        assert_eq!(countered.expiry_at, START + 60);

        let amount = h.escrow.opponent_reclaim(&PLAYER2, &id).await.unwrap();
        assert_eq!(amount, sats(1000));
    }

    #[tokio::test]
    async fn test_sqlite_backed_escrow_survives_restart() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rochambeau.db");

        let store: Arc<dyn LedgerStore> = Arc::new(Storage::new(&path).await.unwrap());
        let mut h = harness_with(default_config(), store).await;
        let (id, secret) = place_default(&mut h, Choice::Scissors).await;
        h.escrow
            .counter(&PLAYER2, &id, Choice::Paper, sats(11_000))
            .await
            .unwrap();
        drop(h);

        let store: Arc<dyn LedgerStore> = Arc::new(Storage::new(&path).await.unwrap());
        let mut h = harness_with(default_config().with_commission(sats(1)), store).await;
        // seeded commission is not overwritten on reopen
        assert_eq!(h.escrow.commission().await.unwrap(), sats(10_000));

        h.escrow
            .verify(&PLAYER1, Choice::Scissors, &secret)
            .await
            .unwrap();
        assert_eq!(h.store.balance_of(&PLAYER1).await.unwrap(), sats(2000));
        assert_eq!(h.store.house_balance().await.unwrap(), sats(20_000));
    }

    #[tokio::test]
    async fn test_stored_bettor_reclaims_by_id() {
        let mut h = harness(default_config()).await;

        // placed under a commitment derived for someone else's address
        let secret = generate_secret();
        let id = h.escrow.commit(Choice::Rock, &secret, &STRANGER);
        h.escrow
            .place(&PLAYER1, &id, 60, &PLAYER2, sats(11_000))
            .await
            .unwrap();

        let err = h
            .escrow
            .bettor_reclaim_by_id(&PLAYER1, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::NotYetExpired));

        h.clock.advance(1000);
        let err = h
            .escrow
            .bettor_reclaim(&PLAYER1, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::WagerNotFound));
        let err = h
            .escrow
            .bettor_reclaim(&STRANGER, Choice::Rock, &secret)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::OnlyBettorCanClaim));
        let err = h
            .escrow
            .bettor_reclaim_by_id(&PLAYER2, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::OnlyBettorCanClaim));

        let amount = h.escrow.bettor_reclaim_by_id(&PLAYER1, &id).await.unwrap();
        assert_eq!(amount, sats(1000));
        assert_eq!(h.escrow.balance_of(&PLAYER1).await.unwrap(), sats(1000));
        assert!(!h.escrow.wager(&id).await.unwrap().unwrap().is_live());
    }

    /// Parks the next `remaining` wager reads until all of them arrived, so
    /// concurrent operations decide on the same ledger state.
    struct Lockstep {
        barrier: tokio::sync::Barrier,
        remaining: AtomicUsize,
    }

    impl Lockstep {
        fn new(parties: usize) -> Arc<Self> {
            Arc::new(Self {
                barrier: tokio::sync::Barrier::new(parties),
                remaining: AtomicUsize::new(0),
            })
        }

        fn arm(&self, reads: usize) {
            self.remaining.store(reads, Ordering::SeqCst);
        }
    }

    struct LockstepStore {
        inner: Arc<dyn LedgerStore>,
        lockstep: Arc<Lockstep>,
    }

    #[async_trait]
    impl LedgerStore for LockstepStore {
        async fn get(&self, id: &WagerId) -> rochambeau_core::Result<Option<Wager>> {
            let wager = self.inner.get(id).await?;
            let parked = self
                .lockstep
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if parked {
                self.lockstep.barrier.wait().await;
            }
            Ok(wager)
        }

        async fn put(&self, id: &WagerId, wager: &Wager) -> rochambeau_core::Result<()> {
            self.inner.put(id, wager).await
        }

        async fn remove(&self, id: &WagerId) -> rochambeau_core::Result<()> {
            self.inner.remove(id).await
        }

        async fn list(&self) -> rochambeau_core::Result<Vec<(WagerId, Wager)>> {
            self.inner.list().await
        }

        async fn balance_of(&self, who: &Address) -> rochambeau_core::Result<Amount> {
            self.inner.balance_of(who).await
        }

        async fn house_balance(&self) -> rochambeau_core::Result<Amount> {
            self.inner.house_balance().await
        }

        async fn commission(&self) -> rochambeau_core::Result<Option<Amount>> {
            self.inner.commission().await
        }

        async fn commit(&self, changes: &Changeset) -> rochambeau_core::Result<()> {
            self.inner.commit(changes).await
        }
    }

    fn lockstep_store(
        inner: Arc<dyn LedgerStore>,
        lockstep: &Arc<Lockstep>,
    ) -> Arc<dyn LedgerStore> {
        Arc::new(LockstepStore {
            inner,
            lockstep: lockstep.clone(),
        })
    }

    #[tokio::test]
    async fn test_racing_counters_admit_exactly_one() {
        let lockstep = Lockstep::new(2);
        let shared: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let mut a = harness_with(default_config(), lockstep_store(shared.clone(), &lockstep))
            .await;
        let mut b = harness_with(default_config(), lockstep_store(shared.clone(), &lockstep))
            .await;

        let (id, _) = place_default(&mut a, Choice::Rock).await;

        lockstep.arm(2);
        let (first, second) = tokio::join!(
            a.escrow.counter(&PLAYER2, &id, Choice::Rock, sats(11_000)),
            b.escrow.counter(&PLAYER2, &id, Choice::Paper, sats(11_000)),
        );

        let (admitted, lost) = match (first, second) {
            (Ok(wager), Err(e)) | (Err(e), Ok(wager)) => (wager, e),
            (first, second) => panic!("expected one winner, got {:?} and {:?}", first, second),
        };
        assert!(matches!(lost, WagerError::AlreadyCountered));

        let stored = shared.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.counter_choice, admitted.counter_choice);
        assert_eq!(shared.house_balance().await.unwrap(), sats(20_000));
        assert_eq!(a.events.events().len() + b.events.events().len(), 2);
    }

    #[tokio::test]
    async fn test_racing_placements_across_connections() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rochambeau.db");
        let lockstep = Lockstep::new(2);

        // two connections behave like two processes sharing the file
        let first: Arc<dyn LedgerStore> = Arc::new(Storage::new(&path).await.unwrap());
        let second: Arc<dyn LedgerStore> = Arc::new(Storage::new(&path).await.unwrap());
        let mut a = harness_with(default_config(), lockstep_store(first.clone(), &lockstep))
            .await;
        let mut b = harness_with(default_config(), lockstep_store(second, &lockstep)).await;

        let id = a.escrow.commit(Choice::Paper, &generate_secret(), &PLAYER1);
        lockstep.arm(2);
        let (left, right) = tokio::join!(
            a.escrow.place(&PLAYER1, &id, 60, &PLAYER2, sats(11_000)),
            b.escrow.place(&PLAYER1, &id, 60, &PLAYER2, sats(12_000)),
        );

        let lost = match (left, right) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            (left, right) => panic!("expected one winner, got {:?} and {:?}", left, right),
        };
        assert!(matches!(lost, WagerError::DuplicateWager));
        assert_eq!(first.house_balance().await.unwrap(), sats(10_000));
    }
}
