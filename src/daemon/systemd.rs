// src/daemon/systemd.rs

//! Systemd notification for dnfdaemon
//!
//! The daemon is bus activated, so the only systemd interaction is the
//! notification protocol:
//! - `READY=1` once the bus name is owned
//! - `STATUS=<message>` for the current session state
//! - `WATCHDOG=1` keep-alive when the unit sets `WatchdogSec=`
//! - `STOPPING=1` before the bus name is released
//!
//! Outside systemd (no `NOTIFY_SOCKET`) every call is a no-op.

use std::time::{Duration, Instant};
use tracing::debug;

fn notify(state: &[sd_notify::NotifyState<'_>]) -> bool {
    match sd_notify::notify(false, state) {
        Ok(()) => true,
        Err(e) => {
            debug!("sd_notify failed: {}", e);
            false
        }
    }
}

/// Service manager watchdog interval requested through `WATCHDOG_USEC`
///
/// Pings are due at half the configured timeout.
pub fn keepalive_interval() -> Option<Duration> {
    std::env::var("WATCHDOG_USEC")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|usec| *usec > 0)
        .map(|usec| Duration::from_micros(usec) / 2)
}

/// Rate limited `WATCHDOG=1` sender
#[derive(Debug)]
pub struct KeepAlive {
    interval: Duration,
    last_ping: Instant,
}

impl KeepAlive {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: Instant::now(),
        }
    }

    /// Whether a ping is due at `now`
    pub fn due(&self, now: Instant) -> bool {
        now.duration_since(self.last_ping) >= self.interval
    }

    /// Send a ping if one is due; true when sent
    pub fn tick(&mut self) -> bool {
        let now = Instant::now();
        if !self.due(now) {
            return false;
        }
        self.last_ping = now;
        notify(&[sd_notify::NotifyState::Watchdog])
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Notification state for one daemon process
#[derive(Debug)]
pub struct SystemdNotifier {
    is_systemd: bool,
    keepalive: Option<KeepAlive>,
}

impl SystemdNotifier {
    /// Detect systemd from the environment
    pub fn from_env() -> Self {
        let is_systemd = std::env::var_os("NOTIFY_SOCKET").is_some();
        let keepalive = if is_systemd {
            keepalive_interval().map(KeepAlive::new)
        } else {
            None
        };
        Self {
            is_systemd,
            keepalive,
        }
    }

    pub fn is_systemd(&self) -> bool {
        self.is_systemd
    }

    /// Bus name acquired
    pub fn ready(&self, bus_name: &str) {
        if self.is_systemd {
            let status = format!("Serving {}", bus_name);
            notify(&[
                sd_notify::NotifyState::Ready,
                sd_notify::NotifyState::Status(&status),
            ]);
        }
    }

    pub fn status(&self, message: &str) {
        if self.is_systemd {
            notify(&[sd_notify::NotifyState::Status(message)]);
        }
    }

    pub fn stopping(&self) {
        if self.is_systemd {
            notify(&[sd_notify::NotifyState::Stopping]);
        }
    }

    /// Forward a keep-alive ping when the unit asked for one
    pub fn keepalive(&mut self) {
        if let Some(keepalive) = self.keepalive.as_mut() {
            keepalive.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_due() {
        let keepalive = KeepAlive::new(Duration::from_secs(10));
        let now = Instant::now();
        assert!(!keepalive.due(now));
        assert!(keepalive.due(now + Duration::from_secs(11)));
        assert_eq!(keepalive.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_notifier_outside_systemd() {
        let mut notifier = SystemdNotifier {
            is_systemd: false,
            keepalive: None,
        };
        // No socket, nothing sent, nothing panics
        notifier.ready("org.baseurl.DnfSession");
        notifier.status("idle");
        notifier.keepalive();
        notifier.stopping();
        assert!(!notifier.is_systemd());
    }
}
