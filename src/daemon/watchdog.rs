// src/daemon/watchdog.rs

//! Idle watchdog
//!
//! The daemon ticks the watchdog once per interval. A tick while a request
//! is being handled does nothing; otherwise the idle counter grows until it
//! passes the threshold for the current lock state, at which point the
//! watchdog asks for termination:
//!
//! - unlocked: more than `idle_threshold` ticks (nobody is using us)
//! - locked: more than `locked_threshold` ticks (the owner went away)
//!
//! The watchdog only runs between requests. It cannot interrupt an engine
//! call that never returns.

use std::time::Duration;
use tracing::debug;

/// Default tick interval
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
/// Ticks an unlocked daemon may stay idle
pub const DEFAULT_IDLE_THRESHOLD: u32 = 20;
/// Ticks a locked session may stay idle
pub const DEFAULT_LOCKED_THRESHOLD: u32 = 600;

/// Why the watchdog wants the daemon gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// No session and no requests
    Idle,
    /// A locked session stopped sending requests
    AbandonedLock,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Continue,
    Terminate(TerminateReason),
}

/// Observed session state for one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSnapshot {
    pub locked: bool,
    pub working: bool,
    pub can_quit: bool,
}

/// Idle counter with thresholds
#[derive(Debug, Clone)]
pub struct Watchdog {
    idle_ticks: u32,
    enabled: bool,
    idle_threshold: u32,
    locked_threshold: u32,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD, DEFAULT_LOCKED_THRESHOLD)
    }
}

impl Watchdog {
    pub fn new(idle_threshold: u32, locked_threshold: u32) -> Self {
        Self {
            idle_ticks: 0,
            enabled: true,
            idle_threshold,
            locked_threshold,
        }
    }

    /// Enable or disable termination
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reset the idle counter
    pub fn activity(&mut self) {
        self.idle_ticks = 0;
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    /// Advance one tick
    pub fn tick(&mut self, session: SessionSnapshot) -> WatchdogVerdict {
        if session.working || !self.enabled {
            return WatchdogVerdict::Continue;
        }

        let (limit, reason) = if session.locked {
            (self.locked_threshold, TerminateReason::AbandonedLock)
        } else {
            (self.idle_threshold, TerminateReason::Idle)
        };

        if self.idle_ticks > limit {
            if session.can_quit {
                return WatchdogVerdict::Terminate(reason);
            }
            debug!("Watchdog limit reached but the daemon cannot quit yet");
            return WatchdogVerdict::Continue;
        }

        self.idle_ticks += 1;
        WatchdogVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> SessionSnapshot {
        SessionSnapshot {
            locked: false,
            working: false,
            can_quit: true,
        }
    }

    fn run(watchdog: &mut Watchdog, session: SessionSnapshot, ticks: u32) -> WatchdogVerdict {
        let mut verdict = WatchdogVerdict::Continue;
        for _ in 0..ticks {
            verdict = watchdog.tick(session);
            if verdict != WatchdogVerdict::Continue {
                break;
            }
        }
        verdict
    }

    #[test]
    fn test_idle_termination_after_threshold() {
        let mut watchdog = Watchdog::new(20, 600);
        // 21 increments take the counter past 20, the 22nd tick terminates
        assert_eq!(run(&mut watchdog, idle(), 21), WatchdogVerdict::Continue);
        assert_eq!(
            watchdog.tick(idle()),
            WatchdogVerdict::Terminate(TerminateReason::Idle)
        );
    }

    #[test]
    fn test_locked_uses_longer_threshold() {
        let mut watchdog = Watchdog::new(20, 600);
        let locked = SessionSnapshot {
            locked: true,
            ..idle()
        };
        assert_eq!(run(&mut watchdog, locked, 601), WatchdogVerdict::Continue);
        assert_eq!(
            watchdog.tick(locked),
            WatchdogVerdict::Terminate(TerminateReason::AbandonedLock)
        );
    }

    #[test]
    fn test_working_and_disabled_are_noops() {
        let mut watchdog = Watchdog::new(0, 0);
        let working = SessionSnapshot {
            working: true,
            ..idle()
        };
        for _ in 0..10 {
            assert_eq!(watchdog.tick(working), WatchdogVerdict::Continue);
        }
        assert_eq!(watchdog.idle_ticks(), 0);

        watchdog.set_enabled(false);
        for _ in 0..10 {
            assert_eq!(watchdog.tick(idle()), WatchdogVerdict::Continue);
        }
        assert_eq!(watchdog.idle_ticks(), 0);
    }

    #[test]
    fn test_cannot_quit_blocks_termination() {
        let mut watchdog = Watchdog::new(1, 1);
        let busy = SessionSnapshot {
            can_quit: false,
            ..idle()
        };
        assert_eq!(run(&mut watchdog, busy, 50), WatchdogVerdict::Continue);
        assert_eq!(
            run(&mut watchdog, idle(), 1),
            WatchdogVerdict::Terminate(TerminateReason::Idle)
        );
    }

    #[test]
    fn test_activity_resets_counter() {
        let mut watchdog = Watchdog::new(3, 3);
        run(&mut watchdog, idle(), 3);
        assert_eq!(watchdog.idle_ticks(), 3);
        watchdog.activity();
        assert_eq!(watchdog.idle_ticks(), 0);
        assert_eq!(run(&mut watchdog, idle(), 4), WatchdogVerdict::Continue);
    }
}
