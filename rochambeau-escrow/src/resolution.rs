//! Resolution engine: who won, and who gets paid what.

use crate::error::{Result, WagerError};
use crate::payout::Credit;
use rochambeau_core::{Address, Amount, Choice, Wager};
use serde::{Deserialize, Serialize};

/// `BEATS[c.index()]` is the hand `c` defeats.
const BEATS: [Choice; 3] = [Choice::Scissors, Choice::Rock, Choice::Paper];

pub fn defeats(choice: Choice) -> Choice {
    BEATS[choice.index()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Tie,
    BettorWins,
    OpponentWins,
}

pub fn resolve(bettor: Choice, opponent: Choice) -> Outcome {
    if opponent == defeats(bettor) {
        Outcome::BettorWins
    } else if bettor == opponent {
        Outcome::Tie
    } else {
        Outcome::OpponentWins
    }
}

/// Result of settling a revealed wager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub outcome: Outcome,
    /// Net stake of one side, captured before the record was closed.
    pub amount: Amount,
    pub bettor_choice: Choice,
    pub opponent_choice: Choice,
    pub bettor: Address,
    pub opponent: Address,
    pub credits: Vec<Credit>,
    pub closed: Wager,
}

impl Settlement {
    pub fn winner(&self) -> Option<Address> {
        match self.outcome {
            Outcome::Tie => None,
            Outcome::BettorWins => Some(self.bettor),
            Outcome::OpponentWins => Some(self.opponent),
        }
    }
}

/// Settle a revealed wager. `wager` must be the record recovered from the
/// bettor's opening; `now` is the operation's single clock reading.
pub fn settle(wager: Option<&Wager>, bettor_choice: Choice, now: u64) -> Result<Settlement> {
    let wager = match wager {
        Some(wager) if !wager.is_expired(now) => wager,
        _ => return Err(WagerError::InvalidOrExpiredWager),
    };

    if !wager.is_live() {
        return Err(WagerError::AlreadyResolved);
    }

    let opponent_choice = wager
        .counter_choice
        .ok_or(WagerError::OpponentHasNotCountered)?;

    let amount = wager.amount;
    let closed = wager.closed();
    let outcome = resolve(bettor_choice, opponent_choice);

    let credits = match outcome {
        Outcome::Tie => vec![
            Credit::new(wager.bettor, amount),
            Credit::new(wager.opponent, amount),
        ],
        Outcome::BettorWins | Outcome::OpponentWins => {
            let pot = amount.checked_mul(2).ok_or(WagerError::Overflow)?;
            let winner = if outcome == Outcome::BettorWins {
                wager.bettor
            } else {
                wager.opponent
            };
            vec![Credit::new(winner, pot)]
        }
    };

    Ok(Settlement {
        outcome,
        amount,
        bettor_choice,
        opponent_choice,
        bettor: wager.bettor,
        opponent: wager.opponent,
        credits,
        closed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BETTOR: Address = Address::new([0xb1; 20]);
    const OPPONENT: Address = Address::new([0x0b; 20]);

    fn countered(choice: Choice) -> Wager {
        let mut wager = Wager::new(Amount::from_sat(1000), 660, BETTOR, OPPONENT);
        wager.counter_choice = Some(choice);
        wager
    }

    #[test]
    fn test_beats_relation_is_the_canonical_cycle() {
        assert_eq!(defeats(Choice::Rock), Choice::Scissors);
        assert_eq!(defeats(Choice::Paper), Choice::Rock);
        assert_eq!(defeats(Choice::Scissors), Choice::Paper);
    }

    #[test]
    fn test_resolution_is_total_and_antisymmetric() {
        for a in Choice::ALL {
            for b in Choice::ALL {
                let forward = resolve(a, b);
                let backward = resolve(b, a);
                match forward {
                    Outcome::Tie => {
                        assert_eq!(a, b);
                        assert_eq!(backward, Outcome::Tie);
                    }
                    Outcome::BettorWins => assert_eq!(backward, Outcome::OpponentWins),
                    Outcome::OpponentWins => assert_eq!(backward, Outcome::BettorWins),
                }
            }
        }
    }

    #[test]
    fn test_settle_win_pays_double_to_winner() {
        let settlement = settle(Some(&countered(Choice::Scissors)), Choice::Rock, 100).unwrap();
        assert_eq!(settlement.outcome, Outcome::BettorWins);
        assert_eq!(settlement.winner(), Some(BETTOR));
        assert_eq!(settlement.credits, vec![Credit::new(BETTOR, Amount::from_sat(2000))]);
        assert!(!settlement.closed.is_live());
        assert_eq!(settlement.closed.opponent, Address::ZERO);

        let settlement = settle(Some(&countered(Choice::Paper)), Choice::Rock, 100).unwrap();
        assert_eq!(settlement.winner(), Some(OPPONENT));
        assert_eq!(settlement.credits, vec![Credit::new(OPPONENT, Amount::from_sat(2000))]);
    }

    #[test]
    fn test_settle_tie_returns_each_stake() {
        let settlement = settle(Some(&countered(Choice::Paper)), Choice::Paper, 100).unwrap();
        assert_eq!(settlement.outcome, Outcome::Tie);
        assert_eq!(settlement.winner(), None);
        let total: u64 = settlement.credits.iter().map(|c| c.amount.to_sat()).sum();
        assert_eq!(total, 2000);
        assert_eq!(settlement.credits.len(), 2);
    }

    #[test]
    fn test_settle_rejections() {
        let err = settle(None, Choice::Rock, 0).unwrap_err();
        assert!(matches!(err, WagerError::InvalidOrExpiredWager));

        let err = settle(Some(&countered(Choice::Rock)), Choice::Rock, 661).unwrap_err();
        assert!(matches!(err, WagerError::InvalidOrExpiredWager));

        let closed = countered(Choice::Rock).closed();
        let err = settle(Some(&closed), Choice::Rock, 0).unwrap_err();
        assert!(matches!(err, WagerError::AlreadyResolved));

        let uncountered = Wager::new(Amount::from_sat(1000), 660, BETTOR, OPPONENT);
        let err = settle(Some(&uncountered), Choice::Rock, 0).unwrap_err();
        assert!(matches!(err, WagerError::OpponentHasNotCountered));
    }
}
