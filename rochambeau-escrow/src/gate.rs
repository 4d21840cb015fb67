use crate::error::{Result, WagerError};
use rochambeau_core::Address;
use std::sync::atomic::{AtomicBool, Ordering};

/// Administrative capability consulted before mutating operations.
pub trait AccessGate: Send + Sync {
    /// Whether `caller` may perform administrative changes.
    fn is_authorized(&self, caller: &Address) -> bool;

    /// Whether the escrow currently accepts mutating operations.
    fn is_active(&self) -> bool;

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(WagerError::SystemPaused)
        }
    }

    fn ensure_authorized(&self, caller: &Address) -> Result<()> {
        if self.is_authorized(caller) {
            Ok(())
        } else {
            Err(WagerError::Unauthorized)
        }
    }
}

/// Single owner with a pause switch.
#[derive(Debug)]
pub struct OwnerGate {
    owner: Address,
    active: AtomicBool,
}

impl OwnerGate {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            active: AtomicBool::new(true),
        }
    }

    pub fn paused(owner: Address) -> Self {
        Self {
            owner,
            active: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn pause(&self, caller: &Address) -> Result<()> {
        self.ensure_authorized(caller)?;
        self.active.store(false, Ordering::SeqCst);
        tracing::warn!("Escrow paused by {}", caller);
        Ok(())
    }

    pub fn resume(&self, caller: &Address) -> Result<()> {
        self.ensure_authorized(caller)?;
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("Escrow resumed by {}", caller);
        Ok(())
    }
}

impl AccessGate for OwnerGate {
    fn is_authorized(&self, caller: &Address) -> bool {
        *caller == self.owner
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
