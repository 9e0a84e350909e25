//! State machine for one (target, duration) pair.
//!
//! ```text
//!          deadline elapses
//!  Active ─────────────────► Idle
//!    ▲                        │
//!    └──── activity ──────────┘
//! ```
//!
//! A watcher starts `Active`. While `Active` it always holds an armed
//! deadline; while `Idle` it holds none until activity re-arms it.

use super::{IdleDuration, TimerId};

/// Whether a watcher's threshold has elapsed since the last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Threshold not yet reached since the last activity.
    Active,
    /// Threshold reached; no return has been reported for this elapse yet.
    Idle,
}

#[derive(Debug)]
pub(crate) struct DurationWatcher {
    /// Inactivity needed before a timeout
    duration: IdleDuration,
    /// Current state
    status: WatcherStatus,
    /// Armed timer, if any. Only this id may elapse the watcher
    deadline: Option<TimerId>,
}

impl DurationWatcher {
    pub(crate) fn new(duration: IdleDuration) -> Self {
        Self {
            duration,
            status: WatcherStatus::Active,
            deadline: None,
        }
    }

    pub(crate) fn duration(&self) -> IdleDuration {
        self.duration
    }

    pub(crate) fn status(&self) -> WatcherStatus {
        self.status
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.status == WatcherStatus::Idle
    }

    /// Record a freshly armed deadline, returning the one it replaces.
    pub(crate) fn arm(&mut self, timer: TimerId) -> Option<TimerId> {
        self.deadline.replace(timer)
    }

    /// Drop the armed deadline, returning it so the caller can cancel it.
    pub(crate) fn disarm(&mut self) -> Option<TimerId> {
        self.deadline.take()
    }

    /// Handle an elapsed deadline. Returns `true` only on the Active -> Idle edge.
    ///
    /// A timer that is not the currently armed one is stale and ignored, so
    /// each elapse reports at most once.
    pub(crate) fn elapse(&mut self, timer: TimerId) -> bool {
        if self.deadline != Some(timer) {
            return false;
        }
        self.deadline = None;
        if self.status == WatcherStatus::Idle {
            return false;
        }
        self.status = WatcherStatus::Idle;
        true
    }

    /// Flip back to `Active`. Returns `true` if the watcher was idle.
    pub(crate) fn reactivate(&mut self) -> bool {
        let was_idle = self.is_idle();
        self.status = WatcherStatus::Active;
        was_idle
    }
}
