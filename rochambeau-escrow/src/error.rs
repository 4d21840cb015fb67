use rochambeau_core::InvalidChoice;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WagerError>;

/// Every rejection the escrow can produce. The `Display` text is the stable
/// reason shown to clients; [`WagerError::code`] is the stable identifier.
#[derive(Error, Debug)]
pub enum WagerError {
    #[error("Rochambeau core error: {0}")]
    Core(#[from] rochambeau_core::CoreError),

    #[error("choice must be rock, paper or scissors")]
    ChoiceInvalid,

    #[error("deposit must exceed the commission")]
    CommissionUncovered,

    #[error("opponent must be specified")]
    NoOpponent,

    #[error("a wager with this commitment already exists")]
    DuplicateWager,

    #[error("expiry delta exceeds the allowed maximum")]
    ExpiryTooLarge,

    #[error("only the designated opponent can counter")]
    NotOpponent,

    #[error("wager has already been countered")]
    AlreadyCountered,

    #[error("deposit must equal the wager amount plus commission")]
    AmountMismatch,

    #[error("wager has expired")]
    WagerExpired,

    #[error("wager is invalid or expired")]
    InvalidOrExpiredWager,

    #[error("wager has already been resolved")]
    AlreadyResolved,

    #[error("opponent has not countered")]
    OpponentHasNotCountered,

    #[error("bet has not expired yet")]
    NotYetExpired,

    #[error("cannot reclaim countered bet")]
    CounteredWager,

    #[error("only the opponent can claim")]
    OnlyOpponentCanClaim,

    #[error("only the bettor can claim")]
    OnlyBettorCanClaim,

    #[error("only the bettor can reveal")]
    NotBettor,

    #[error("no wager exists for this commitment")]
    WagerNotFound,

    #[error("insufficient balance: need {need} sats, have {available} sats")]
    InsufficientBalance { need: u64, available: u64 },

    #[error("caller is not authorized")]
    Unauthorized,

    #[error("escrow is paused")]
    SystemPaused,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WagerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Stable machine-readable name of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            WagerError::Core(_) => "Core",
            WagerError::ChoiceInvalid => "ChoiceInvalid",
            WagerError::CommissionUncovered => "CommissionUncovered",
            WagerError::NoOpponent => "NoOpponent",
            WagerError::DuplicateWager => "DuplicateWager",
            WagerError::ExpiryTooLarge => "ExpiryTooLarge",
            WagerError::NotOpponent => "NotOpponent",
            WagerError::AlreadyCountered => "AlreadyCountered",
            WagerError::AmountMismatch => "AmountMismatch",
            WagerError::WagerExpired => "WagerExpired",
            WagerError::InvalidOrExpiredWager => "InvalidOrExpiredWager",
            WagerError::AlreadyResolved => "AlreadyResolved",
            WagerError::OpponentHasNotCountered => "OpponentHasNotCountered",
            WagerError::NotYetExpired => "NotYetExpired",
            WagerError::CounteredWager => "CounteredWager",
            WagerError::OnlyOpponentCanClaim => "OnlyOpponentCanClaim",
            WagerError::OnlyBettorCanClaim => "OnlyBettorCanClaim",
            WagerError::NotBettor => "NotBettor",
            WagerError::WagerNotFound => "WagerNotFound",
            WagerError::InsufficientBalance { .. } => "InsufficientBalance",
            WagerError::Unauthorized => "Unauthorized",
            WagerError::SystemPaused => "SystemPaused",
            WagerError::Overflow => "Overflow",
            WagerError::TransferFailed(_) => "TransferFailed",
            WagerError::Config(_) => "Config",
        }
    }
}

impl From<InvalidChoice> for WagerError {
    fn from(_: InvalidChoice) -> Self {
        WagerError::ChoiceInvalid
    }
}
