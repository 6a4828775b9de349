// src/daemon/service.rs

//! Service context and request dispatch
//!
//! [`DaemonService`] owns all process-wide state: the session lock, the
//! watchdog, the permission gate, the database handle, the pending
//! transaction and the GPG decisions. The bus layer holds it behind a
//! mutex and calls one method per remote call, passing the caller's unique
//! bus name.
//!
//! Package operations go through [`DaemonService::dispatch`]:
//!
//! 1. permission check for the method's class
//! 2. lock check (the caller must own the session)
//! 3. mark busy and reset the idle counter
//! 4. run the handler
//! 5. clear busy; a failed write-class handler also resets the handle
//!
//! Session control (`Lock`, `Unlock`, `SetWatchdogState`, `Exit`) only
//! needs the permission check.

use super::auth::{PermissionClass, PermissionGate};
use super::config::DaemonConfig;
use super::events::EventObserver;
use super::executor::TransactionExecutor;
use super::gpg::GpgConfirmations;
use super::handle::PackageDatabase;
use super::lock::SessionLock;
use super::transaction::{PatternOp, TransactionAccumulator};
use super::watchdog::{SessionSnapshot, Watchdog, WatchdogVerdict};
use super::{history, query};
use crate::engine::{EngineProvider, PackageEngine};
use crate::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interface version reported by `GetVersion`
pub const API_VERSION: i32 = 1;

/// Process-wide daemon state
pub struct DaemonService {
    config: DaemonConfig,
    lock: SessionLock,
    watchdog: Watchdog,
    working: bool,
    can_quit: bool,
    gate: PermissionGate,
    db: PackageDatabase,
    transaction: TransactionAccumulator,
    gpg: GpgConfirmations,
    events: Arc<dyn EventObserver>,
}

impl DaemonService {
    pub fn new(
        config: DaemonConfig,
        gate: PermissionGate,
        provider: Arc<dyn EngineProvider>,
        events: Arc<dyn EventObserver>,
    ) -> Self {
        let mut watchdog = Watchdog::new(config.daemon.idle_timeout, config.daemon.locked_timeout);
        watchdog.set_enabled(config.daemon.watchdog);
        Self {
            config,
            lock: SessionLock::new(),
            watchdog,
            working: false,
            can_quit: true,
            gate,
            db: PackageDatabase::new(provider),
            transaction: TransactionAccumulator::new(),
            gpg: GpgConfirmations::new(),
            events,
        }
    }

    /// Whether this variant can grant write-class methods
    pub fn allows_system_writes(&self) -> bool {
        self.gate.allows_system_writes()
    }

    pub fn lock_owner(&self) -> Option<&str> {
        self.lock.owner()
    }

    pub fn can_quit(&self) -> bool {
        self.can_quit
    }

    pub fn is_working(&self) -> bool {
        self.working
    }

    pub fn is_loaded(&self) -> bool {
        self.db.is_loaded()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Requests recorded in the pending transaction
    pub fn pending_actions(&self) -> usize {
        self.transaction.pending().len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            locked: self.lock.is_locked(),
            working: self.working,
            can_quit: self.can_quit,
        }
    }

    /// Drop the engine and everything that depends on it
    fn reset_database(&mut self) {
        self.transaction.reset();
        self.db.reset();
    }

    /// Gate and run a package operation
    fn dispatch<T>(
        &mut self,
        caller: &str,
        class: PermissionClass,
        handler: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.gate.check(caller, class)?;
        self.lock.check(caller)?;

        self.working = true;
        self.watchdog.activity();
        let result = handler(self);
        self.working = false;

        if let Err(e) = &result {
            warn!("{} request from {} failed: {}", class.as_str(), caller, e);
            if class == PermissionClass::Write {
                self.reset_database();
            }
        }
        result
    }

    /// Read-class operation against the opened engine
    fn with_engine<T>(
        &mut self,
        caller: &str,
        handler: impl FnOnce(&mut dyn PackageEngine) -> Result<T>,
    ) -> Result<T> {
        self.dispatch(caller, PermissionClass::Read, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            handler(engine)
        })
    }

    // Session control

    pub fn get_version(&self) -> i32 {
        API_VERSION
    }

    /// Take the session lock; `false` when anyone holds it
    pub fn lock(&mut self, caller: &str) -> Result<bool> {
        self.gate.check(caller, PermissionClass::Read)?;
        self.watchdog.activity();
        Ok(self.lock.try_lock(caller))
    }

    /// Release the session lock and tear down the handle
    pub fn unlock(&mut self, caller: &str) -> Result<bool> {
        self.gate.check(caller, PermissionClass::Read)?;
        self.lock.unlock(caller)?;
        self.watchdog.activity();
        self.reset_database();
        Ok(true)
    }

    pub fn set_watchdog_state(&mut self, caller: &str, state: bool) -> Result<bool> {
        self.gate.check(caller, PermissionClass::Read)?;
        info!("Watchdog {} by {}", if state { "enabled" } else { "disabled" }, caller);
        self.watchdog.set_enabled(state);
        Ok(state)
    }

    /// Prepare to exit; the caller stops the event loop on `true`
    pub fn exit(&mut self, caller: &str) -> Result<bool> {
        self.gate.check(caller, PermissionClass::Read)?;
        if !self.can_quit {
            info!("Exit requested by {} while a transaction is running", caller);
            return Ok(false);
        }
        if let Some(owner) = self.lock.owner() {
            if owner != caller {
                info!("Exit requested by {} while {} holds the lock", caller, owner);
                return Ok(false);
            }
        }
        info!("Exit requested by {}", caller);
        self.reset_database();
        self.lock.release();
        Ok(true)
    }

    /// One watchdog tick; on termination the session is torn down first
    pub fn watchdog_tick(&mut self) -> WatchdogVerdict {
        let verdict = self.watchdog.tick(self.snapshot());
        match verdict {
            WatchdogVerdict::Continue => {
                debug!("Watchdog: {}", self.watchdog.idle_ticks());
            }
            WatchdogVerdict::Terminate(reason) => {
                info!("Watchdog terminating the daemon: {:?}", reason);
                self.reset_database();
                if let Some(owner) = self.lock.release() {
                    info!("Released session lock held by {}", owner);
                }
            }
        }
        verdict
    }

    // Repositories and configuration

    pub fn get_repositories(&mut self, caller: &str, filter: &str) -> Result<Vec<String>> {
        self.with_engine(caller, |engine| Ok(query::repositories(engine, filter)))
    }

    pub fn set_enabled_repos(&mut self, caller: &str, repo_ids: &[String]) -> Result<()> {
        self.dispatch(caller, PermissionClass::Read, |svc| {
            svc.transaction.reset();
            svc.db.set_enabled_repos(repo_ids, svc.events.as_ref())
        })
    }

    pub fn get_repo(&mut self, caller: &str, repo_id: &str) -> Result<Value> {
        self.with_engine(caller, |engine| query::get_repo(engine, repo_id))
    }

    pub fn expire_cache(&mut self, caller: &str) -> Result<bool> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            svc.transaction.reset();
            Ok(svc.db.expire_cache(svc.events.as_ref()))
        })
    }

    pub fn get_config(&mut self, caller: &str, setting: &str) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(query::get_config(engine, setting)))
    }

    pub fn set_config(&mut self, caller: &str, setting: &str, value: &str) -> Result<bool> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            query::set_config(engine, setting, value)
        })
    }

    // Queries

    pub fn get_packages(&mut self, caller: &str, filter: &str, attrs: &[String]) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(query::get_packages(engine, filter, attrs)))
    }

    pub fn get_packages_by_name(
        &mut self,
        caller: &str,
        pattern: &str,
        attrs: &[String],
        newest_only: bool,
    ) -> Result<Value> {
        self.with_engine(caller, |engine| {
            Ok(query::packages_by_name(engine, pattern, attrs, newest_only))
        })
    }

    pub fn get_attribute(&mut self, caller: &str, package_id: &str, attr: &str) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(query::get_attribute(engine, package_id, attr)))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &mut self,
        caller: &str,
        fields: &[String],
        keys: &[String],
        attrs: &[String],
        match_all: bool,
        newest_only: bool,
        tags: bool,
    ) -> Result<Value> {
        if tags {
            debug!("Package tag search is not available, searching fields only");
        }
        self.with_engine(caller, |engine| {
            Ok(query::search(engine, fields, keys, attrs, match_all, newest_only))
        })
    }

    pub fn get_groups(&mut self, caller: &str) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(query::groups(engine)))
    }

    pub fn get_group_packages(
        &mut self,
        caller: &str,
        group_id: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Value> {
        self.with_engine(caller, |engine| {
            Ok(query::group_packages(engine, group_id, filter, attrs))
        })
    }

    // Transactions

    pub fn add_transaction(&mut self, caller: &str, package_id: &str, action: &str) -> Result<Value> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            svc.transaction
                .add(engine, svc.events.as_ref(), package_id, action)
        })
    }

    pub fn clear_transaction(&mut self, caller: &str) -> Result<()> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            svc.transaction.clear(engine);
            Ok(())
        })
    }

    pub fn get_transaction(&mut self, caller: &str) -> Result<Value> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            Ok(svc.transaction.get(engine))
        })
    }

    pub fn build_transaction(&mut self, caller: &str) -> Result<Value> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            Ok(svc.transaction.build(engine, svc.events.as_ref()))
        })
    }

    /// Download and apply the pending transaction: `[code, messages]`
    ///
    /// A negative `max_errors` uses the configured download error budget.
    pub fn run_transaction(&mut self, caller: &str, max_errors: i32) -> Result<Value> {
        let max_errors =
            u32::try_from(max_errors).unwrap_or(self.config.daemon.max_download_errors);
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let events = Arc::clone(&svc.events);
            let engine = svc.db.get(events.as_ref())?;
            let plan = svc.transaction.resolve(engine).clone();
            svc.transaction.reset();

            let mut executor = TransactionExecutor::new(events.as_ref(), max_errors);
            let result = executor.run(&mut svc.db, &plan, &mut svc.gpg, &mut svc.can_quit)?;
            Ok(result.to_json())
        })
    }

    /// Convenience operations over space separated patterns
    pub fn apply_patterns(&mut self, caller: &str, op: PatternOp, patterns: &str) -> Result<Value> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            let engine = svc.db.get(svc.events.as_ref())?;
            Ok(svc
                .transaction
                .apply_patterns(engine, svc.events.as_ref(), op, patterns))
        })
    }

    // History

    pub fn get_history_by_days(&mut self, caller: &str, start: i32, end: i32) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(history::by_days(engine, start, end)))
    }

    pub fn history_search(&mut self, caller: &str, patterns: &[String]) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(history::search(engine, patterns)))
    }

    pub fn get_history_packages(&mut self, caller: &str, tid: i32) -> Result<Value> {
        self.with_engine(caller, |engine| Ok(history::packages(engine, tid)))
    }

    // GPG

    pub fn confirm_gpg_import(&mut self, caller: &str, key_id: &str, confirmed: bool) -> Result<()> {
        self.dispatch(caller, PermissionClass::Write, |svc| {
            svc.gpg.confirm(key_id, confirmed);
            Ok(())
        })
    }
}

/// Encode a handler result for the wire
pub fn to_wire(value: &Value) -> String {
    match value {
        Value::Null => json!(null).to_string(),
        other => other.to_string(),
    }
}
