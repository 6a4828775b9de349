// src/daemon/lock.rs

//! Single-owner session lock
//!
//! Every package operation runs against one shared database handle, so a
//! client has to take the session lock before it may do anything else.
//! The lock is a plain owner token (the caller's unique bus name): it never
//! blocks, is not re-entrant, and ownership is checked on every request.
//!
//! # Example
//!
//! ```
//! use dnfdaemon::daemon::lock::SessionLock;
//!
//! let mut lock = SessionLock::new();
//! assert!(lock.try_lock(":1.42"));
//! assert!(!lock.try_lock(":1.43"));
//! assert!(lock.check(":1.43").is_err());
//! lock.unlock(":1.42").unwrap();
//! ```

use crate::{Error, Result};
use tracing::info;

/// Message carried by `LockedError`
pub const LOCKED_MESSAGE: &str = "dnf is locked by another application";

/// Session lock state
#[derive(Debug, Default)]
pub struct SessionLock {
    owner: Option<String>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if nobody holds it
    ///
    /// Returns `false` when the lock is held, including by `caller` itself.
    pub fn try_lock(&mut self, caller: &str) -> bool {
        if self.owner.is_some() {
            return false;
        }
        info!("Session locked by {}", caller);
        self.owner = Some(caller.to_string());
        true
    }

    /// Release the lock held by `caller`
    pub fn unlock(&mut self, caller: &str) -> Result<()> {
        self.check(caller)?;
        info!("Session unlocked by {}", caller);
        self.owner = None;
        Ok(())
    }

    /// Fail with `LockedError` unless `caller` holds the lock
    pub fn check(&self, caller: &str) -> Result<()> {
        match self.owner.as_deref() {
            Some(owner) if owner == caller => Ok(()),
            _ => Err(Error::LockedError(LOCKED_MESSAGE.to_string())),
        }
    }

    /// Drop the lock regardless of owner, returning who held it
    pub fn release(&mut self) -> Option<String> {
        self.owner.take()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }
}
