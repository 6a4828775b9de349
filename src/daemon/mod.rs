// src/daemon/mod.rs

//! dnfdaemon - package management over D-Bus
//!
//! The daemon owns one package database handle and lets one client at a
//! time drive it:
//!
//! ```text
//! client                                dnfdaemon
//!    │                                      │
//!    ├─ Lock() ────────────────────────────►│ owner = caller
//!    ├─ AddTransaction(ref, "install") ────►│ accumulate + resolve
//!    │◄──────────── [true, []] ─────────────┤
//!    ├─ RunTransaction(10) ────────────────►│ download, apply
//!    │◄──── TransactionEvent / RPMProgress ─┤
//!    │◄──────────── [0, []] ────────────────┤
//!    ├─ Unlock() ──────────────────────────►│ handle torn down
//! ```
//!
//! A client that disappears while holding the lock is reclaimed by the
//! watchdog; an idle unlocked daemon exits on its own and is restarted by
//! bus activation.
//!
//! # Module Structure
//!
//! - `lock` - single-writer session lock
//! - `watchdog` - idle and abandoned-lock detection
//! - `auth` - permission classes, PolicyKit and audit log
//! - `handle` - lazily opened engine instance
//! - `transaction` - pending actions and resolution
//! - `executor` - download and apply
//! - `events` / `gpg` - outward events and key confirmations
//! - `query` / `history` / `attributes` - read-only views
//! - `service` - the context every remote call goes through
//! - `dbus` - the `org.baseurl.Dnf` interface

pub mod attributes;
pub mod auth;
pub mod config;
#[cfg(feature = "daemon")]
pub mod dbus;
pub mod events;
pub mod executor;
pub mod gpg;
pub mod handle;
pub mod history;
pub mod lock;
pub mod query;
pub mod service;
#[cfg(feature = "daemon")]
pub mod systemd;
pub mod transaction;
pub mod watchdog;

pub use auth::{AuditEntry, AuditLogger, Authorizer, PermissionClass, PermissionGate, TrustAll};
pub use config::DaemonConfig;
pub use events::{DaemonEvent, EventObserver, NullObserver, TransactionPhase};
pub use executor::{RunResult, TransactionExecutor};
pub use lock::{LOCKED_MESSAGE, SessionLock};
pub use service::{API_VERSION, DaemonService};
pub use transaction::{ActionKind, PatternOp, ResolvedPlan, TransactionAccumulator};
pub use watchdog::{SessionSnapshot, TerminateReason, Watchdog, WatchdogVerdict};

/// Which bus the daemon serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// System-wide variant, writes need PolicyKit
    System,
    /// Per-user variant, read-only
    Session,
}

impl BusKind {
    /// Well-known name claimed on the bus
    pub fn bus_name(&self) -> &'static str {
        match self {
            BusKind::System => "org.baseurl.DnfSystem",
            BusKind::Session => "org.baseurl.DnfSession",
        }
    }
}

/// Permission gate for a daemon variant
#[cfg(feature = "daemon")]
pub fn permission_gate(config: &DaemonConfig, bus: BusKind) -> crate::Result<PermissionGate> {
    let gate = match bus {
        BusKind::Session => PermissionGate::session(),
        BusKind::System if config.auth.require_polkit => {
            PermissionGate::system(Box::new(auth::PolkitAuthorizer::new()?))
        }
        BusKind::System => {
            tracing::warn!("PolicyKit disabled in configuration, trusting every caller");
            PermissionGate::system(Box::new(TrustAll))
        }
    };
    Ok(gate.with_audit_capacity(config.auth.audit_entries))
}

/// Run the daemon
///
/// This is the main entry point. It:
/// 1. Builds the service context and its permission gate
/// 2. Claims the bus name and serves the interface
/// 3. Ticks the watchdog until it or `Exit()` ends the session
/// 4. Releases the bus name
#[cfg(feature = "daemon")]
pub async fn run_daemon(
    config: DaemonConfig,
    bus: BusKind,
    provider: std::sync::Arc<dyn crate::engine::EngineProvider>,
) -> crate::Result<()> {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::{Notify, mpsc};
    use tokio::time::MissedTickBehavior;
    use tracing::{debug, info};

    info!("Starting dnfdaemon version {}", env!("CARGO_PKG_VERSION"));

    let mut notifier = systemd::SystemdNotifier::from_env();
    if notifier.is_systemd() {
        info!("Running under systemd supervision");
    }

    let gate = permission_gate(&config, bus)?;
    let tick = config.tick_interval();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<DaemonEvent>();
    let service = Arc::new(Mutex::new(DaemonService::new(
        config,
        gate,
        provider,
        Arc::new(event_tx),
    )));
    let shutdown = Arc::new(Notify::new());

    let connection = dbus::serve(bus, Arc::clone(&service), Arc::clone(&shutdown)).await?;
    let forwarder = tokio::spawn(dbus::forward_events(connection.clone(), event_rx));
    notifier.ready(bus.bus_name());

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Exit requested, shutting down");
                notifier.status("Exit requested");
                break;
            }
            _ = ticker.tick() => {
                notifier.keepalive();
                // A handler holding the service is a busy daemon
                let Some(mut svc) = service.try_lock() else {
                    debug!("Watchdog: request in progress");
                    continue;
                };
                if let WatchdogVerdict::Terminate(reason) = svc.watchdog_tick() {
                    info!("Watchdog shutdown: {:?}", reason);
                    notifier.status(&format!("Watchdog shutdown: {:?}", reason));
                    break;
                }
            }
        }
    }

    notifier.stopping();

    // The interface and this function hold the only service references, and
    // with them the event sender. Dropping both closes the channel.
    if let Err(e) = connection
        .object_server()
        .remove::<dbus::DnfInterface, _>(dbus::OBJECT_PATH)
        .await
    {
        tracing::warn!("Failed to remove interface: {}", e);
    }
    drop(service);
    if !finish_forwarding(forwarder, SIGNAL_DRAIN_TIMEOUT).await {
        tracing::warn!("Dropped undelivered signals at shutdown");
    }

    if let Err(e) = connection.release_name(bus.bus_name()).await {
        tracing::warn!("Failed to release {}: {}", bus.bus_name(), e);
    }
    drop(connection);
    info!("Daemon shut down");
    Ok(())
}

/// How long shutdown waits for queued signals to go out
#[cfg(feature = "daemon")]
const SIGNAL_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Wait for the event forwarder to drain its channel
///
/// Returns false when it did not finish within `grace`; it is aborted then.
#[cfg(feature = "daemon")]
async fn finish_forwarding(forwarder: tokio::task::JoinHandle<()>, grace: std::time::Duration) -> bool {
    let abort = forwarder.abort_handle();
    match tokio::time::timeout(grace, forwarder).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("Event forwarder failed: {}", e);
            false
        }
        Err(_) => {
            abort.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_names() {
        assert_eq!(BusKind::System.bus_name(), "org.baseurl.DnfSystem");
        assert_eq!(BusKind::Session.bus_name(), "org.baseurl.DnfSession");
    }

    #[cfg(feature = "daemon")]
    #[test]
    fn test_session_gate_has_no_writes() {
        let gate = permission_gate(&DaemonConfig::default(), BusKind::Session).unwrap();
        assert!(!gate.allows_system_writes());
    }

    #[cfg(feature = "daemon")]
    #[tokio::test]
    async fn test_shutdown_delivers_queued_events() {
        use std::sync::Arc;
        use std::time::Duration;
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel::<DaemonEvent>();
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
                sink.lock().push(event);
            }
        });

        tx.transaction_phase(TransactionPhase::RunTransaction, serde_json::Value::Null);
        tx.transaction_phase(TransactionPhase::EndRun, serde_json::Value::Null);
        drop(tx);

        assert!(finish_forwarding(forwarder, Duration::from_secs(5)).await);
        assert_eq!(delivered.lock().len(), 2);
        assert!(matches!(
            delivered.lock()[1],
            DaemonEvent::TransactionEvent {
                phase: TransactionPhase::EndRun,
                ..
            }
        ));
    }

    #[cfg(feature = "daemon")]
    #[tokio::test]
    async fn test_shutdown_gives_up_on_stuck_forwarder() {
        let forwarder = tokio::spawn(std::future::pending::<()>());
        assert!(!finish_forwarding(forwarder, std::time::Duration::from_millis(20)).await);
    }
}
