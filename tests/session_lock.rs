// tests/session_lock.rs

//! Session lock, permission gate and watchdog behaviour seen through the
//! service context.

mod common;

use common::*;
use dnfdaemon::Error;
use dnfdaemon::daemon::{DaemonConfig, LOCKED_MESSAGE, TerminateReason, WatchdogVerdict};

#[test]
fn test_double_lock() {
    let mut h = system_service();
    assert!(h.service.lock(CLIENT_A).unwrap());
    assert!(!h.service.lock(CLIENT_B).unwrap());
    // Not re-entrant either
    assert!(!h.service.lock(CLIENT_A).unwrap());

    assert!(h.service.unlock(CLIENT_A).unwrap());
    assert!(h.service.lock(CLIENT_B).unwrap());
    assert_eq!(h.service.lock_owner(), Some(CLIENT_B));
}

#[test]
fn test_unlock_requires_ownership() {
    let mut h = locked_system_service();
    match h.service.unlock(CLIENT_B) {
        Err(Error::LockedError(msg)) => assert_eq!(msg, LOCKED_MESSAGE),
        other => panic!("expected LockedError, got {:?}", other),
    }
    assert_eq!(h.service.lock_owner(), Some(CLIENT_A));

    // Unlocking a free daemon is also refused
    let mut free = system_service();
    assert!(matches!(free.service.unlock(CLIENT_A), Err(Error::LockedError(_))));
}

#[test]
fn test_every_package_call_needs_the_lock() {
    let mut h = system_service();
    assert!(matches!(
        h.service.get_packages(CLIENT_A, "installed", &[]),
        Err(Error::LockedError(_))
    ));
    assert!(matches!(
        h.service.add_transaction(CLIENT_A, PKG_X, "install"),
        Err(Error::LockedError(_))
    ));
    assert!(matches!(
        h.service.get_repositories(CLIENT_A, ""),
        Err(Error::LockedError(_))
    ));

    h.service.lock(CLIENT_A).unwrap();
    assert!(matches!(
        h.service.get_history_by_days(CLIENT_B, 0, 30),
        Err(Error::LockedError(_))
    ));
    assert!(h.service.get_history_by_days(CLIENT_A, 0, 30).is_ok());
}

#[test]
fn test_session_variant_is_read_only() {
    let mut h = session_service();
    assert!(!h.service.allows_system_writes());
    assert!(h.service.lock(CLIENT_A).unwrap());

    let installed = h.service.get_packages(CLIENT_A, "installed", &[]).unwrap();
    assert_eq!(installed.as_array().unwrap().len(), 2);

    for result in [
        h.service.add_transaction(CLIENT_A, PKG_X, "install"),
        h.service.build_transaction(CLIENT_A),
        h.service.run_transaction(CLIENT_A, 10),
        h.service.apply_patterns(CLIENT_A, dnfdaemon::daemon::PatternOp::Install, "nano"),
    ] {
        assert!(matches!(result, Err(Error::AccessDeniedError(_))));
    }
    assert!(matches!(
        h.service.confirm_gpg_import(CLIENT_A, "5A03B4DD8254ECA02", true),
        Err(Error::AccessDeniedError(_))
    ));

    // Denials are audited
    let denied = h
        .service
        .gate()
        .audit()
        .recent_entries(10)
        .iter()
        .filter(|entry| !entry.allowed)
        .count();
    assert!(denied >= 5);
}

#[test]
fn test_unlock_discards_pending_transaction() {
    let mut h = locked_system_service();
    h.service.add_transaction(CLIENT_A, PKG_X, "install").unwrap();
    assert_eq!(h.service.pending_actions(), 1);

    h.service.unlock(CLIENT_A).unwrap();
    assert!(!h.service.is_loaded());

    h.service.lock(CLIENT_B).unwrap();
    let plan = h.service.get_transaction(CLIENT_B).unwrap();
    assert_eq!(plan, serde_json::json!([false, []]));
}

#[test]
fn test_exit() {
    let mut h = locked_system_service();
    assert!(!h.service.exit(CLIENT_B).unwrap());
    assert_eq!(h.service.lock_owner(), Some(CLIENT_A));

    assert!(h.service.exit(CLIENT_A).unwrap());
    assert_eq!(h.service.lock_owner(), None);

    let mut idle = session_service();
    assert!(idle.service.exit(CLIENT_B).unwrap());
}

#[test]
fn test_watchdog_reclaims_abandoned_lock() {
    let mut config = DaemonConfig::default();
    config.daemon.locked_timeout = 3;
    let mut h = system_service_with(config);
    h.service.lock(CLIENT_A).unwrap();
    h.service.add_transaction(CLIENT_A, PKG_X, "install").unwrap();

    let mut ticks = 0;
    let reason = loop {
        ticks += 1;
        assert!(ticks < 10, "watchdog never fired");
        if let WatchdogVerdict::Terminate(reason) = h.service.watchdog_tick() {
            break reason;
        }
    };
    assert_eq!(reason, TerminateReason::AbandonedLock);
    assert_eq!(h.service.lock_owner(), None);
    assert!(!h.service.is_loaded());
    assert_eq!(h.service.pending_actions(), 0);

    // Another client can take over
    assert!(h.service.lock(CLIENT_B).unwrap());
}

#[test]
fn test_activity_postpones_watchdog() {
    let mut config = DaemonConfig::default();
    config.daemon.locked_timeout = 2;
    let mut h = system_service_with(config);
    h.service.lock(CLIENT_A).unwrap();

    for _ in 0..10 {
        assert_eq!(h.service.watchdog_tick(), WatchdogVerdict::Continue);
        assert_eq!(h.service.watchdog_tick(), WatchdogVerdict::Continue);
        h.service.get_packages(CLIENT_A, "installed", &[]).unwrap();
    }
    assert_eq!(h.service.lock_owner(), Some(CLIENT_A));
}

#[test]
fn test_disabled_watchdog_never_fires() {
    let mut config = DaemonConfig::default();
    config.daemon.idle_timeout = 1;
    let mut h = system_service_with(config);
    assert!(!h.service.set_watchdog_state(CLIENT_A, false).unwrap());

    for _ in 0..20 {
        assert_eq!(h.service.watchdog_tick(), WatchdogVerdict::Continue);
    }

    h.service.set_watchdog_state(CLIENT_A, true).unwrap();
    let fired = (0..5).any(|_| h.service.watchdog_tick() != WatchdogVerdict::Continue);
    assert!(fired);
}
