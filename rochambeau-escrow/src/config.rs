use crate::commitment::CommitmentBinding;
use crate::error::{Result, WagerError};
use rochambeau_core::{Address, Amount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutMode {
    /// Credit internal balances, drained by `withdraw`.
    #[default]
    Pull,
    /// Transfer out at resolution time.
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Address of this escrow instance, mixed into every commitment.
    pub instance: Address,
    /// Commission charged on first use of a ledger; later changes live in the store.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub commission: Amount,
    pub max_expiry_delta: u64,
    pub binding: CommitmentBinding,
    /// Push the deadline out by `max_expiry_delta` once countered.
    pub extend_on_counter: bool,
    pub reject_expired_counter: bool,
    pub payout: PayoutMode,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            instance: Address::new([0x52; 20]),
            commission: Amount::from_sat(10_000),
            max_expiry_delta: 600, // 10 minutes
            binding: CommitmentBinding::Bettor,
            extend_on_counter: true,
            reject_expired_counter: true,
            payout: PayoutMode::Pull,
        }
    }
}

impl EscrowConfig {
    pub fn new(instance: Address) -> Self {
        Self {
            instance,
            ..Self::default()
        }
    }

    /// The variant without a reveal window: no extension on counter and no
    /// expiry check when countering.
    pub fn without_reveal_window(instance: Address) -> Self {
        Self {
            instance,
            extend_on_counter: false,
            reject_expired_counter: false,
            ..Self::default()
        }
    }

    pub fn with_commission(mut self, commission: Amount) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_max_expiry_delta(mut self, secs: u64) -> Self {
        self.max_expiry_delta = secs;
        self
    }

    pub fn with_binding(mut self, binding: CommitmentBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_payout(mut self, payout: PayoutMode) -> Self {
        self.payout = payout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance.is_zero() {
            return Err(WagerError::config("instance address cannot be zero"));
        }

        if self.max_expiry_delta == 0 {
            return Err(WagerError::config(
                "max expiry delta must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EscrowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.commission, Amount::from_sat(10_000));
        assert_eq!(config.max_expiry_delta, 600);
        assert_eq!(config.payout, PayoutMode::Pull);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EscrowConfig::new(Address::ZERO).validate().is_err());
        assert!(EscrowConfig::default()
            .with_max_expiry_delta(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = EscrowConfig::without_reveal_window(Address::new([1u8; 20]))
            .with_payout(PayoutMode::Push)
            .with_binding(CommitmentBinding::Instance);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"payout\":\"push\""));
        let back: EscrowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
