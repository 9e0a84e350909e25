//! Outward notifications: idle timeouts and returns from idle.

use std::time::Duration;
use tokio::sync::broadcast;

use super::IdleDuration;

/// A watcher transition, as delivered over channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent<T> {
    /// `duration` elapsed on `target` with no activity.
    Timeout { target: T, duration: IdleDuration },
    /// Activity resumed on `target` after `duration` had elapsed.
    /// `idle_for` is the time since the target's previous activity.
    Return {
        target: T,
        duration: IdleDuration,
        idle_for: Duration,
    },
}

impl<T> IdleEvent<T> {
    pub fn target(&self) -> &T {
        match self {
            IdleEvent::Timeout { target, .. } | IdleEvent::Return { target, .. } => target,
        }
    }

    pub fn duration(&self) -> IdleDuration {
        match self {
            IdleEvent::Timeout { duration, .. } | IdleEvent::Return { duration, .. } => *duration,
        }
    }
}

/// Receiver of watcher transitions.
///
/// When one activity signal returns several watchers from idle, the order of
/// the `on_idle_return` calls across durations is not guaranteed.
pub trait IdleObserver<T> {
    fn on_idle_timeout(&mut self, target: &T, duration: IdleDuration);

    fn on_idle_return(&mut self, target: &T, duration: IdleDuration, idle_for: Duration);
}

/// Fan transitions out to every broadcast receiver. Sends with no receivers are dropped.
impl<T: Clone> IdleObserver<T> for broadcast::Sender<IdleEvent<T>> {
    fn on_idle_timeout(&mut self, target: &T, duration: IdleDuration) {
        let _ = self.send(IdleEvent::Timeout {
            target: target.clone(),
            duration,
        });
    }

    fn on_idle_return(&mut self, target: &T, duration: IdleDuration, idle_for: Duration) {
        let _ = self.send(IdleEvent::Return {
            target: target.clone(),
            duration,
            idle_for,
        });
    }
}

/// Collect transitions in memory.
impl<T: Clone> IdleObserver<T> for Vec<IdleEvent<T>> {
    fn on_idle_timeout(&mut self, target: &T, duration: IdleDuration) {
        self.push(IdleEvent::Timeout {
            target: target.clone(),
            duration,
        });
    }

    fn on_idle_return(&mut self, target: &T, duration: IdleDuration, idle_for: Duration) {
        self.push(IdleEvent::Return {
            target: target.clone(),
            duration,
            idle_for,
        });
    }
}
