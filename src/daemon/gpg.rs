// src/daemon/gpg.rs

//! Signing key import confirmations
//!
//! The first time the engine asks about a key, the client is told through a
//! `GPGImport` event and the key is recorded as not confirmed, so the run
//! fails. The client then calls `ConfirmGPGImport` and retries; the stored
//! decision is reused silently from then on. Decisions live for the whole
//! process, across sessions.

use super::events::{DaemonEvent, EventObserver};
use crate::engine::{GpgKeyInfo, KeyConfirmation};
use std::collections::HashMap;
use tracing::info;

/// key id -> confirmed
#[derive(Debug, Default)]
pub struct GpgConfirmations {
    decisions: HashMap<String, bool>,
}

impl GpgConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the user's decision for a key
    pub fn confirm(&mut self, key_id: &str, confirmed: bool) {
        info!("GPG key {} import confirmed: {}", key_id, confirmed);
        self.decisions.insert(key_id.to_string(), confirmed);
    }

    pub fn decision(&self, key_id: &str) -> Option<bool> {
        self.decisions.get(key_id).copied()
    }

    /// Decide on a key, asking the client on first sight
    pub fn check(&mut self, key: &GpgKeyInfo, events: &dyn EventObserver) -> bool {
        if let Some(&decision) = self.decisions.get(&key.key_id) {
            return decision;
        }
        self.decisions.insert(key.key_id.clone(), false);
        events.emit(DaemonEvent::GpgImport {
            package_id: key.package_id.clone(),
            user_id: key.user_id.clone(),
            key_id: key.key_id.clone(),
            key_url: key.key_url.clone(),
            timestamp: key.timestamp,
        });
        false
    }
}

/// Adapter handed to the engine while a transaction is applied
pub struct KeyGate<'a> {
    confirmations: &'a mut GpgConfirmations,
    events: &'a dyn EventObserver,
}

impl<'a> KeyGate<'a> {
    pub fn new(confirmations: &'a mut GpgConfirmations, events: &'a dyn EventObserver) -> Self {
        Self {
            confirmations,
            events,
        }
    }
}

impl KeyConfirmation for KeyGate<'_> {
    fn confirm_import(&mut self, key: &GpgKeyInfo) -> bool {
        self.confirmations.check(key, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key() -> GpgKeyInfo {
        GpgKeyInfo {
            package_id: "signed,0,1.0,1,noarch,repo1".into(),
            user_id: "Repo Signing <keys@example.org>".into(),
            key_id: "ABCD1234".into(),
            key_url: "https://example.org/RPM-GPG-KEY".into(),
            fingerprint: "0123 4567 89AB CDEF".into(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_first_sight_emits_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut gpg = GpgConfirmations::new();

        assert!(!gpg.check(&key(), &tx));
        assert!(!gpg.check(&key(), &tx));
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::GpgImport { .. })));
        assert!(rx.try_recv().is_err());
        assert_eq!(gpg.decision("ABCD1234"), Some(false));
    }

    #[test]
    fn test_confirmation_is_reused_silently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut gpg = GpgConfirmations::new();
        gpg.confirm("ABCD1234", true);

        let mut gate = KeyGate::new(&mut gpg, &tx);
        assert!(gate.confirm_import(&key()));
        assert!(gate.confirm_import(&key()));
        assert!(rx.try_recv().is_err());
    }
}
