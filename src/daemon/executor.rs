// src/daemon/executor.rs

//! Transaction execution: download, then apply
//!
//! ```text
//! Idle -> Downloading -> Applying -> Done
//!              |             |
//!              +-> Failed <--+
//! ```
//!
//! Phase events go out strictly as
//! `start-run -> [pkg-to-download -> download] -> run-transaction -> end-run`.
//! The database handle is reset at the end of every run, whatever the
//! outcome.

use super::events::{DownloadTracker, EventObserver, RpmForwarder, TransactionPhase};
use super::gpg::{GpgConfirmations, KeyGate};
use super::handle::PackageDatabase;
use super::transaction::ResolvedPlan;
use crate::engine::EngineError;
use crate::Result;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Return code for a successful run
pub const RC_OK: i32 = 0;
/// Return code for resolution or apply failures
pub const RC_FAILED: i32 = 1;
/// Return code when too many downloads failed
pub const RC_DOWNLOAD_ERRORS: i32 = 4;

/// Executor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    Idle,
    Downloading,
    Applying,
    Done,
    Failed,
}

/// Outcome handed back to the client as `[code, messages]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub code: i32,
    pub messages: Vec<String>,
}

impl RunResult {
    fn new(code: i32, messages: Vec<String>) -> Self {
        Self { code, messages }
    }

    pub fn to_json(&self) -> Value {
        json!([self.code, self.messages])
    }
}

/// Drives one run of a resolved plan
pub struct TransactionExecutor<'a> {
    events: &'a dyn EventObserver,
    max_download_errors: u32,
    phase: ExecutorPhase,
}

impl<'a> TransactionExecutor<'a> {
    pub fn new(events: &'a dyn EventObserver, max_download_errors: u32) -> Self {
        Self {
            events,
            max_download_errors,
            phase: ExecutorPhase::Idle,
        }
    }

    pub fn phase(&self) -> ExecutorPhase {
        self.phase
    }

    fn enter(&mut self, phase: ExecutorPhase) {
        debug!("Executor {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Download and apply `plan`
    ///
    /// `can_quit` is cleared while the engine applies the transaction.
    pub fn run(
        &mut self,
        db: &mut PackageDatabase,
        plan: &ResolvedPlan,
        gpg: &mut GpgConfirmations,
        can_quit: &mut bool,
    ) -> Result<RunResult> {
        self.events
            .transaction_phase(TransactionPhase::StartRun, Value::Null);
        let result = match plan {
            ResolvedPlan::Conflicts(messages) => Ok(RunResult::new(RC_FAILED, messages.clone())),
            _ => self.download_and_apply(db, plan, gpg, can_quit),
        };
        *can_quit = true;
        db.reset();
        self.events
            .transaction_phase(TransactionPhase::EndRun, Value::Null);

        let result = result?;
        self.enter(if result.code == RC_OK {
            ExecutorPhase::Done
        } else {
            ExecutorPhase::Failed
        });
        info!("Transaction finished with code {}", result.code);
        Ok(result)
    }

    fn download_and_apply(
        &mut self,
        db: &mut PackageDatabase,
        plan: &ResolvedPlan,
        gpg: &mut GpgConfirmations,
        can_quit: &mut bool,
    ) -> Result<RunResult> {
        let engine = db.get(self.events)?;

        let downloads = plan.downloads();
        if !downloads.is_empty() {
            self.enter(ExecutorPhase::Downloading);
            let ids: Vec<String> = downloads.iter().map(|p| p.package_id()).collect();
            self.events
                .transaction_phase(TransactionPhase::PkgToDownload, json!(ids));
            self.events
                .transaction_phase(TransactionPhase::Download, Value::Null);

            let mut tracker = DownloadTracker::new(self.events, self.max_download_errors);
            let outcome = engine.download(&downloads, &mut tracker);
            match outcome {
                Err(EngineError::DownloadAborted) => {
                    self.enter(ExecutorPhase::Failed);
                    return Ok(RunResult::new(RC_DOWNLOAD_ERRORS, tracker.error_messages()));
                }
                Err(e) => {
                    warn!("Download failed: {}", e);
                    self.enter(ExecutorPhase::Failed);
                    return Ok(RunResult::new(RC_DOWNLOAD_ERRORS, vec![e.to_string()]));
                }
                Ok(()) if tracker.aborted() => {
                    self.enter(ExecutorPhase::Failed);
                    return Ok(RunResult::new(RC_DOWNLOAD_ERRORS, tracker.error_messages()));
                }
                Ok(()) => {
                    debug!(
                        "Downloaded {} files, {} errors",
                        tracker.files_done(),
                        tracker.error_count()
                    );
                }
            }
        }

        self.enter(ExecutorPhase::Applying);
        self.events
            .transaction_phase(TransactionPhase::RunTransaction, Value::Null);
        *can_quit = false;

        let mut rpm = RpmForwarder::new(self.events);
        let mut keys = KeyGate::new(gpg, self.events);
        match engine.commit(&mut rpm, &mut keys) {
            Ok(outcome) => Ok(RunResult::new(outcome.code, outcome.messages)),
            Err(e) => {
                warn!("Transaction failed: {}", e);
                Ok(RunResult::new(RC_FAILED, vec![e.to_string()]))
            }
        }
    }
}
