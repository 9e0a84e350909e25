//! Per-target state: shared last-activity timestamp and its duration watchers.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::clock::{Clock, Scheduler};
use super::watcher::DurationWatcher;
use super::{IdleDuration, SubscriptionId, TimerId, WatcherStatus};

/// Outcome of one activity signal on a target.
#[derive(Debug)]
pub(crate) struct ActivityBurst {
    /// Time since the previous activity, shared by every returning watcher.
    pub idle_for: Duration,
    /// Durations that were idle and have just flipped back to active.
    pub returning: Vec<IdleDuration>,
}

#[derive(Debug)]
pub(crate) struct TargetState {
    /// Last counted activity, shared by every duration
    last_active: Instant,
    /// One watcher per registered duration
    watchers: BTreeMap<IdleDuration, DurationWatcher>,
    /// Activity subscription, held while any watcher exists
    subscription: Option<SubscriptionId>,
}

impl TargetState {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            last_active: now,
            watchers: BTreeMap::new(),
            subscription: None,
        }
    }

    pub(crate) fn last_active(&self) -> Instant {
        self.last_active
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub(crate) fn contains(&self, duration: IdleDuration) -> bool {
        self.watchers.contains_key(&duration)
    }

    pub(crate) fn durations(&self) -> Vec<IdleDuration> {
        self.watchers.keys().copied().collect()
    }

    pub(crate) fn status(&self, duration: IdleDuration) -> Option<WatcherStatus> {
        self.watchers.get(&duration).map(DurationWatcher::status)
    }

    pub(crate) fn set_subscription(&mut self, subscription: SubscriptionId) {
        self.subscription = Some(subscription);
    }

    pub(crate) fn take_subscription(&mut self) -> Option<SubscriptionId> {
        self.subscription.take()
    }

    /// Add an active watcher armed at `last_active + duration`.
    ///
    /// Returns `false` without touching anything if the duration is already watched.
    pub(crate) fn add<T, C>(
        &mut self,
        target: &T,
        duration: IdleDuration,
        scheduler: &mut Scheduler<T, C>,
    ) -> bool
    where
        T: Clone,
        C: Clock<T>,
    {
        if self.contains(duration) {
            return false;
        }
        let mut watcher = DurationWatcher::new(duration);
        watcher.arm(scheduler.arm(target, duration, self.last_active + duration.as_duration()));
        self.watchers.insert(duration, watcher);
        true
    }

    /// Remove a watcher and cancel its pending deadline.
    pub(crate) fn remove<T, C>(&mut self, duration: IdleDuration, scheduler: &mut Scheduler<T, C>) -> bool
    where
        T: Clone,
        C: Clock<T>,
    {
        let Some(mut watcher) = self.watchers.remove(&duration) else {
            return false;
        };
        if let Some(timer) = watcher.disarm() {
            scheduler.cancel(timer);
        }
        true
    }

    /// Remove every watcher, cancelling all pending deadlines.
    pub(crate) fn clear<T, C>(&mut self, scheduler: &mut Scheduler<T, C>)
    where
        T: Clone,
        C: Clock<T>,
    {
        for (_, mut watcher) in std::mem::take(&mut self.watchers) {
            if let Some(timer) = watcher.disarm() {
                scheduler.cancel(timer);
            }
        }
    }

    /// Apply an elapsed deadline. Returns `true` on the Active -> Idle edge.
    pub(crate) fn elapse(&mut self, duration: IdleDuration, timer: TimerId) -> bool {
        self.watchers
            .get_mut(&duration)
            .is_some_and(|watcher| watcher.elapse(timer))
    }

    /// Stamp activity at `now` and flip every idle watcher back to active.
    ///
    /// The idle watchers are collected before any status changes, so the
    /// returned snapshot is unaffected by whatever the caller does next.
    /// Deadlines are not touched here; follow up with [`Self::rearm_all`].
    pub(crate) fn record_activity(&mut self, now: Instant) -> ActivityBurst {
        let idle_for = now.saturating_duration_since(self.last_active);
        self.last_active = now;

        let returning: Vec<IdleDuration> = self
            .watchers
            .values()
            .filter(|w| w.is_idle())
            .map(DurationWatcher::duration)
            .collect();
        for duration in &returning {
            if let Some(watcher) = self.watchers.get_mut(duration) {
                watcher.reactivate();
            }
        }

        ActivityBurst { idle_for, returning }
    }

    /// Restart every watcher's deadline from `last_active`, idle or not.
    pub(crate) fn rearm_all<T, C>(&mut self, target: &T, scheduler: &mut Scheduler<T, C>)
    where
        T: Clone,
        C: Clock<T>,
    {
        for (duration, watcher) in self.watchers.iter_mut() {
            let at = self.last_active + duration.as_duration();
            if let Some(old) = watcher.arm(scheduler.arm(target, *duration, at)) {
                scheduler.cancel(old);
            }
        }
    }
}
