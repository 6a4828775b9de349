// src/daemon/handle.rs

//! Lazily opened package database handle
//!
//! The engine index is expensive to build, so it is opened on first use
//! and kept until something invalidates it: a finished transaction, an
//! unlock, a change of the enabled repository set or a cache expiry.

use super::events::{EventObserver, MetadataTracker};
use crate::engine::{EngineProvider, PackageEngine};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner of the engine instance
pub struct PackageDatabase {
    provider: Arc<dyn EngineProvider>,
    engine: Option<Box<dyn PackageEngine>>,
    /// `None` means the repositories enabled in configuration
    enabled_repos: Option<BTreeSet<String>>,
}

impl PackageDatabase {
    pub fn new(provider: Arc<dyn EngineProvider>) -> Self {
        Self {
            provider,
            engine: None,
            enabled_repos: None,
        }
    }

    /// The engine, opening it if needed
    pub fn get(&mut self, events: &dyn EventObserver) -> Result<&mut dyn PackageEngine> {
        if self.engine.is_none() {
            debug!("Opening package engine");
            let mut tracker = MetadataTracker::new(events);
            let engine = self
                .provider
                .open(self.enabled_repos.as_ref(), &mut tracker)?;
            self.engine = Some(engine);
        }
        match self.engine.as_deref_mut() {
            Some(engine) => Ok(engine),
            None => Err(Error::TransactionError(
                "package engine is not available".to_string(),
            )),
        }
    }

    /// Release the engine; the next [`get`](Self::get) rebuilds it
    pub fn reset(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!("Releasing package engine");
            engine.close();
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    /// Explicit repository set, if one was requested
    pub fn enabled_repos(&self) -> Option<&BTreeSet<String>> {
        self.enabled_repos.as_ref()
    }

    /// Switch to `ids` and rebuild the index right away
    pub fn set_enabled_repos(&mut self, ids: &[String], events: &dyn EventObserver) -> Result<()> {
        info!("Enabling repositories: {}", ids.join(", "));
        self.reset();
        self.enabled_repos = Some(ids.iter().cloned().collect());
        self.get(events)?;
        Ok(())
    }

    /// Expire the metadata cache and reload
    ///
    /// Repository failures are reported as an `ErrorMessage` event and a
    /// `false` return, never as an error.
    pub fn expire_cache(&mut self, events: &dyn EventObserver) -> bool {
        self.reset();
        if let Err(e) = self.provider.expire_cache() {
            warn!("Cache expiry failed: {}", e);
            events.error_message(&e.to_string());
            return false;
        }
        match self.get(events) {
            Ok(_) => true,
            Err(e) => {
                warn!("Reloading metadata failed: {}", e);
                events.error_message(&e.to_string());
                false
            }
        }
    }
}
