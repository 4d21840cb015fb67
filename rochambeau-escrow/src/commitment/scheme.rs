use rochambeau_core::{Address, Choice};

/// Trait for commitment schemes
pub trait CommitmentScheme {
    type Opening;
    type Commitment: PartialEq;

    fn commit(&self, opening: &Self::Opening) -> Self::Commitment;

    fn verify(&self, commitment: &Self::Commitment, opening: &Self::Opening) -> bool {
        self.commit(opening) == *commitment
    }
}

/// What the bettor reveals: the hand, the secret and who is revealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opening {
    pub choice: Choice,
    pub secret: super::Secret,
    pub committer: Address,
}

impl Opening {
    pub fn new(choice: Choice, secret: super::Secret, committer: Address) -> Self {
        Self {
            choice,
            secret,
            committer,
        }
    }
}
