// src/daemon/events.rs

//! Outward events and the engine callback adapters that produce them
//!
//! Engine callbacks arrive synchronously on the request thread. Each one is
//! turned into at most one [`DaemonEvent`] and handed to an
//! [`EventObserver`] in the same order; the bus layer forwards them as
//! signals. Nothing here buffers or coalesces beyond the fraction
//! throttling the download and metadata trackers apply.

use crate::engine::{DownloadObserver, DownloadStatus, MetadataObserver, RpmAction, RpmObserver};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Phases reported through `TransactionEvent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionPhase {
    StartBuild,
    EndBuild,
    StartRun,
    PkgToDownload,
    Download,
    RunTransaction,
    EndRun,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartBuild => "start-build",
            Self::EndBuild => "end-build",
            Self::StartRun => "start-run",
            Self::PkgToDownload => "pkg-to-download",
            Self::Download => "download",
            Self::RunTransaction => "run-transaction",
            Self::EndRun => "end-run",
        }
    }
}

/// Events emitted by the daemon
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    ErrorMessage {
        message: String,
    },
    DownloadStart {
        num_files: i32,
        num_bytes: u64,
    },
    DownloadProgress {
        name: String,
        frac: f64,
        total_frac: f64,
        total_files: i32,
    },
    DownloadEnd {
        name: String,
        status: i32,
        message: String,
    },
    RepoMetaDataProgress {
        name: String,
        frac: f64,
    },
    TransactionEvent {
        phase: TransactionPhase,
        /// JSON payload (`null` when the phase carries none)
        data: String,
    },
    RpmProgress {
        package: String,
        action: String,
        te_current: u64,
        te_total: u64,
        ts_current: i32,
        ts_total: i32,
    },
    GpgImport {
        package_id: String,
        user_id: String,
        key_id: String,
        key_url: String,
        timestamp: i64,
    },
}

/// Receiver of daemon events
pub trait EventObserver: Send + Sync {
    fn emit(&self, event: DaemonEvent);

    fn error_message(&self, message: &str) {
        self.emit(DaemonEvent::ErrorMessage {
            message: message.to_string(),
        });
    }

    fn transaction_phase(&self, phase: TransactionPhase, payload: serde_json::Value) {
        self.emit(DaemonEvent::TransactionEvent {
            phase,
            data: payload.to_string(),
        });
    }
}

impl EventObserver for mpsc::UnboundedSender<DaemonEvent> {
    fn emit(&self, event: DaemonEvent) {
        // Ignore send errors (signal task gone during shutdown)
        let _ = self.send(event);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl EventObserver for NullObserver {
    fn emit(&self, _event: DaemonEvent) {}
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Forwards repository metadata progress, dropping increments under 1%
pub struct MetadataTracker<'a> {
    events: &'a dyn EventObserver,
    last: HashMap<String, f64>,
}

impl<'a> MetadataTracker<'a> {
    pub fn new(events: &'a dyn EventObserver) -> Self {
        Self {
            events,
            last: HashMap::new(),
        }
    }
}

impl MetadataObserver for MetadataTracker<'_> {
    fn progress(&mut self, repo_id: &str, fraction: f64) {
        let last = self.last.entry(repo_id.to_string()).or_insert(0.0);
        if fraction > *last + 0.01 {
            *last = fraction;
            self.events.emit(DaemonEvent::RepoMetaDataProgress {
                name: repo_id.to_string(),
                frac: fraction,
            });
        }
    }

    fn end(&mut self, repo_id: &str, ok: bool) {
        if ok {
            self.events.emit(DaemonEvent::RepoMetaDataProgress {
                name: repo_id.to_string(),
                frac: 1.0,
            });
        } else {
            debug!("Metadata load for {} failed", repo_id);
        }
    }
}

/// Download bookkeeping: fractions, completed files and per-file errors
pub struct DownloadTracker<'a> {
    events: &'a dyn EventObserver,
    max_errors: u32,
    total_files: usize,
    total_bytes: u64,
    files_done: usize,
    per_file: HashMap<String, u64>,
    last_total_frac: f64,
    errors: BTreeMap<String, Vec<String>>,
    error_count: u32,
}

impl<'a> DownloadTracker<'a> {
    pub fn new(events: &'a dyn EventObserver, max_errors: u32) -> Self {
        Self {
            events,
            max_errors,
            total_files: 0,
            total_bytes: 0,
            files_done: 0,
            per_file: HashMap::new(),
            last_total_frac: 0.0,
            errors: BTreeMap::new(),
            error_count: 0,
        }
    }

    pub fn files_done(&self) -> usize {
        self.files_done
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Whether the error budget has been exceeded
    pub fn aborted(&self) -> bool {
        self.error_count > self.max_errors
    }

    /// Failed files as `"<file> : <message>"` lines
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flat_map(|(file, msgs)| msgs.iter().map(move |m| format!("{} : {}", file, m)))
            .collect()
    }

    fn total_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.per_file.values().sum::<u64>() as f64 / self.total_bytes as f64
    }
}

impl DownloadObserver for DownloadTracker<'_> {
    fn start(&mut self, total_files: usize, total_bytes: u64) {
        self.total_files = total_files;
        self.total_bytes = total_bytes;
        self.files_done = 0;
        self.events.emit(DaemonEvent::DownloadStart {
            num_files: saturating_i32(total_files),
            num_bytes: total_bytes,
        });
    }

    fn progress(&mut self, name: &str, done: u64, total: u64) {
        self.per_file.insert(name.to_string(), done);
        let total_frac = self.total_fraction();
        if total_frac > self.last_total_frac {
            self.last_total_frac = total_frac;
            let frac = if total > 0 {
                done as f64 / total as f64
            } else {
                0.0
            };
            self.events.emit(DaemonEvent::DownloadProgress {
                name: name.to_string(),
                frac,
                total_frac,
                total_files: saturating_i32(self.files_done),
            });
        }
    }

    fn end(&mut self, name: &str, status: DownloadStatus, message: &str) -> ControlFlow<()> {
        let failed = !matches!(status, DownloadStatus::Ok | DownloadStatus::AlreadyExists);
        if failed {
            warn!("Download of {} failed: {}", name, message);
            self.errors
                .entry(name.to_string())
                .or_default()
                .push(message.to_string());
            self.error_count += 1;
        } else {
            self.files_done += 1;
        }

        self.events.emit(DaemonEvent::DownloadEnd {
            name: name.to_string(),
            status: status.code(),
            message: message.to_string(),
        });

        if failed && self.aborted() {
            warn!(
                "{} download errors exceed the limit of {}, aborting",
                self.error_count, self.max_errors
            );
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Forwards RPM transaction callbacks
pub struct RpmForwarder<'a> {
    events: &'a dyn EventObserver,
}

impl<'a> RpmForwarder<'a> {
    pub fn new(events: &'a dyn EventObserver) -> Self {
        Self { events }
    }
}

impl RpmObserver for RpmForwarder<'_> {
    fn progress(
        &mut self,
        package: &str,
        action: RpmAction,
        elem_current: u64,
        elem_total: u64,
        tx_current: usize,
        tx_total: usize,
    ) {
        self.events.emit(DaemonEvent::RpmProgress {
            package: package.to_string(),
            action: action.as_str().to_string(),
            te_current: elem_current,
            te_total: elem_total,
            ts_current: saturating_i32(tx_current),
            ts_total: saturating_i32(tx_total),
        });
    }

    fn script_error(&mut self, package: &str, message: &str) {
        self.events
            .error_message(&format!("Scriptlet error in {}: {}", package, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<DaemonEvent>) -> Vec<DaemonEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(TransactionPhase::PkgToDownload.as_str(), "pkg-to-download");
        assert_eq!(
            serde_json::to_value(TransactionPhase::RunTransaction).unwrap(),
            serde_json::json!("run-transaction")
        );
    }

    #[test]
    fn test_metadata_throttling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = MetadataTracker::new(&tx);
        tracker.progress("fedora", 0.005);
        tracker.progress("fedora", 0.5);
        tracker.progress("fedora", 0.505);
        tracker.end("fedora", true);
        tracker.end("broken", false);

        let fracs: Vec<f64> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                DaemonEvent::RepoMetaDataProgress { frac, .. } => frac,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(fracs, vec![0.5, 1.0]);
    }

    #[test]
    fn test_download_total_fraction_only_increases() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = DownloadTracker::new(&tx, 100);
        tracker.start(2, 200);
        tracker.progress("a", 50, 100);
        tracker.progress("a", 50, 100);
        tracker.progress("a", 100, 100);
        assert!(tracker.end("a", DownloadStatus::Ok, "").is_continue());
        tracker.progress("b", 100, 100);
        assert!(tracker.end("b", DownloadStatus::AlreadyExists, "").is_continue());

        let events = drain(&mut rx);
        let totals: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                DaemonEvent::DownloadProgress { total_frac, .. } => Some(*total_frac),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![0.25, 0.5, 1.0]);
        assert_eq!(tracker.files_done(), 2);
        assert_eq!(
            events[0],
            DaemonEvent::DownloadStart {
                num_files: 2,
                num_bytes: 200
            }
        );
    }

    #[test]
    fn test_download_aborts_past_error_budget() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = DownloadTracker::new(&tx, 1);
        tracker.start(3, 300);
        assert!(tracker.end("a", DownloadStatus::Failed, "404").is_continue());
        assert!(!tracker.aborted());
        assert!(tracker.end("b", DownloadStatus::Failed, "timeout").is_break());
        assert!(tracker.aborted());
        assert_eq!(tracker.error_messages(), vec!["a : 404", "b : timeout"]);

        let ends = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, DaemonEvent::DownloadEnd { status: 1, .. }))
            .count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_rpm_forwarding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rpm = RpmForwarder::new(&tx);
        rpm.progress("bash-5.3-1.x86_64", RpmAction::Update, 10, 20, 1, 2);
        rpm.script_error("bash-5.3-1.x86_64", "exit 1");

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            DaemonEvent::RpmProgress {
                package: "bash-5.3-1.x86_64".into(),
                action: "update".into(),
                te_current: 10,
                te_total: 20,
                ts_current: 1,
                ts_total: 2,
            }
        );
        assert!(matches!(events[1], DaemonEvent::ErrorMessage { .. }));
    }
}
