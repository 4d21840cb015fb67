pub mod scheme;

pub use scheme::{CommitmentScheme, Opening};

use rand::RngCore;
use rochambeau_core::{Address, Choice, CoreError, WagerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const DOMAIN_TAG: &[u8] = b"rochambeau/commit/v1";

/// Which identities are folded into the commitment digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentBinding {
    /// Instance and committer address. The bettor is whoever can
    /// reproduce the digest from their own address.
    #[default]
    Bettor,
    /// Instance address only. The bettor is the stored placer.
    Instance,
}

impl CommitmentBinding {
    fn tag(self) -> u8 {
        match self {
            CommitmentBinding::Bettor => 1,
            CommitmentBinding::Instance => 2,
        }
    }
}

/// Opaque 256-bit value that hides the bettor's choice until reveal.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Secret([u8; 32]);

impl Secret {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Secret {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHex("secret must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Secret {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Secret> for String {
    fn from(secret: Secret) -> Self {
        secret.to_string()
    }
}

/// SHA-256 commitment bound to one escrow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WagerCommitment {
    instance: Address,
    binding: CommitmentBinding,
}

impl WagerCommitment {
    pub fn new(instance: Address, binding: CommitmentBinding) -> Self {
        Self { instance, binding }
    }

    pub fn instance(&self) -> Address {
        self.instance
    }

    pub fn binding(&self) -> CommitmentBinding {
        self.binding
    }

    /// Identifier for `(choice, secret[, committer])`. The committer is
    /// ignored under [`CommitmentBinding::Instance`].
    pub fn derive(&self, choice: Choice, secret: &Secret, committer: &Address) -> WagerId {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(self.instance.as_bytes());
        hasher.update([self.binding.tag(), choice.as_u8()]);
        hasher.update(secret.as_bytes());
        if self.binding == CommitmentBinding::Bettor {
            hasher.update(committer.as_bytes());
        }
        WagerId::new(hasher.finalize().into())
    }
}

impl CommitmentScheme for WagerCommitment {
    type Opening = Opening;
    type Commitment = WagerId;

    fn commit(&self, opening: &Opening) -> WagerId {
        self.derive(opening.choice, &opening.secret, &opening.committer)
    }
}

/// Rnd secret for commitment
pub fn generate_secret() -> Secret {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    Secret(secret)
}
