use crate::error::CoreError;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 20-byte party identity. The zero address stands for "nobody".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Commitment identifier: the 256-bit digest a wager is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WagerId([u8; 32]);

impl WagerId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Shortened form for log lines and tables.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for WagerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHex(format!("wager id must be 32 bytes: {}", s)))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for WagerId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WagerId> for String {
    fn from(id: WagerId) -> Self {
        id.to_string()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid choice: {0}")]
pub struct InvalidChoice(pub String);

/// A hand. Byte 0 is the "none" sentinel and never decodes to a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Choice {
    Rock = 1,
    Paper = 2,
    Scissors = 3,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Zero-based position, used to index fixed tables.
    pub fn index(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<u8> for Choice {
    type Error = InvalidChoice;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Choice::Rock),
            2 => Ok(Choice::Paper),
            3 => Ok(Choice::Scissors),
            other => Err(InvalidChoice(other.to_string())),
        }
    }
}

impl FromStr for Choice {
    type Err = InvalidChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" | "r" | "1" => Ok(Choice::Rock),
            "paper" | "p" | "2" => Ok(Choice::Paper),
            "scissors" | "s" | "3" => Ok(Choice::Scissors),
            _ => Err(InvalidChoice(s.to_string())),
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Choice::Rock => "rock",
            Choice::Paper => "paper",
            Choice::Scissors => "scissors",
        };
        f.write_str(name)
    }
}

/// One wager, keyed by its commitment identifier.
///
/// `amount == 0` marks a finished record. Finished records keep their
/// bettor and expiry but have the opponent and counter choice cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    pub expiry_at: u64,
    pub bettor: Address,
    pub opponent: Address,
    pub counter_choice: Option<Choice>,
}

impl Wager {
    pub fn new(amount: Amount, expiry_at: u64, bettor: Address, opponent: Address) -> Self {
        Self {
            amount,
            expiry_at,
            bettor,
            opponent,
            counter_choice: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.amount > Amount::ZERO
    }

    pub fn is_countered(&self) -> bool {
        self.counter_choice.is_some()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry_at
    }

    /// The record after resolution or reclaim.
    pub fn closed(&self) -> Self {
        Self {
            amount: Amount::ZERO,
            expiry_at: self.expiry_at,
            bettor: self.bettor,
            opponent: Address::ZERO,
            counter_choice: None,
        }
    }
}
