//! Target-to-state coordinator: registration, activity routing, deadline handling.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, Deadline, Scheduler};
use super::target::TargetState;
use super::{ActivitySource, IdleDuration, IdleError, IdleObserver, WatcherStatus};

/// Multi-duration idle timers keyed by target.
///
/// The registry does no IO of its own. Time and deferred deadlines come from
/// the [`Clock`], activity subscriptions from the [`ActivitySource`], and
/// transitions go to the [`IdleObserver`]. Elapsed deadlines must be handed
/// back through [`fire_deadline`](Self::fire_deadline) and activity through
/// [`record_activity`](Self::record_activity), one call at a time.
pub struct IdleTimerRegistry<T, C, S, O> {
    /// Watched targets and their durations
    targets: HashMap<T, TargetState>,
    /// Clock plus timer id allocation
    scheduler: Scheduler<T, C>,
    /// Activity subscriptions
    source: S,
    /// Receiver of timeouts and returns
    observer: O,
}

impl<T, C, S, O> IdleTimerRegistry<T, C, S, O>
where
    T: Clone + Eq + Hash + Debug,
    C: Clock<T>,
    S: ActivitySource<T>,
    O: IdleObserver<T>,
{
    pub fn new(clock: C, source: S, observer: O) -> Self {
        Self {
            targets: HashMap::new(),
            scheduler: Scheduler::new(clock),
            source,
            observer,
        }
    }

    /// Watch `target` for `duration_ms` of inactivity.
    ///
    /// Registering a duration the target already has is a no-op: timing is
    /// not reset and no second subscription is made.
    pub fn register(&mut self, target: T, duration_ms: u64) -> Result<&mut Self, IdleError> {
        let duration = IdleDuration::from_millis(duration_ms)?;
        Ok(self.watch(target, duration))
    }

    pub fn register_default(&mut self, target: T) -> &mut Self {
        self.watch(target, IdleDuration::DEFAULT)
    }

    /// Typed form of [`register`](Self::register).
    ///
    /// A new target starts its clock now. On a target that already has
    /// watchers the deadline is `last_active + duration`, which may already
    /// be past; it then fires on the next tick.
    pub fn watch(&mut self, target: T, duration: IdleDuration) -> &mut Self {
        let now = self.scheduler.now();
        let state = self
            .targets
            .entry(target.clone())
            .or_insert_with(|| TargetState::new(now));
        let first = state.is_empty();

        if !state.add(&target, duration, &mut self.scheduler) {
            trace!(?target, %duration, "idle timer already registered");
            return self;
        }
        if first {
            state.set_subscription(self.source.subscribe(&target));
        }
        debug!(?target, %duration, "idle timer registered");
        self
    }

    /// Stop watching one duration. Unknown targets and durations are ignored.
    pub fn unregister(&mut self, target: &T, duration_ms: u64) -> &mut Self {
        match IdleDuration::from_millis(duration_ms) {
            Ok(duration) => self.unwatch(target, duration),
            Err(_) => self,
        }
    }

    pub fn unregister_default(&mut self, target: &T) -> &mut Self {
        self.unwatch(target, IdleDuration::DEFAULT)
    }

    /// Typed form of [`unregister`](Self::unregister).
    ///
    /// Removing the last duration unsubscribes the target and drops its state.
    pub fn unwatch(&mut self, target: &T, duration: IdleDuration) -> &mut Self {
        let Some(state) = self.targets.get_mut(target) else {
            return self;
        };
        if !state.remove(duration, &mut self.scheduler) {
            return self;
        }
        debug!(?target, %duration, "idle timer removed");

        if state.is_empty() {
            self.discard(target);
        }
        self
    }

    /// Stop watching every duration on `target`.
    pub fn unregister_all(&mut self, target: &T) -> &mut Self {
        if self.targets.contains_key(target) {
            self.discard(target);
        }
        self
    }

    /// Time since the target's last recorded activity.
    pub fn idle_time(&self, target: &T) -> Result<Duration, IdleError> {
        let state = self.targets.get(target).ok_or(IdleError::NoTimerRegistered)?;
        Ok(self.scheduler.now().saturating_duration_since(state.last_active()))
    }

    /// Handle one activity signal for `target`.
    ///
    /// Every idle watcher is reported as returned with the same `idle_for`,
    /// then every watcher's deadline restarts from now. Signals for targets
    /// with no registered durations are ignored.
    pub fn record_activity(&mut self, target: &T) {
        let now = self.scheduler.now();
        let Some(state) = self.targets.get_mut(target) else {
            trace!(?target, "activity on unwatched target");
            return;
        };

        let burst = state.record_activity(now);
        for duration in burst.returning {
            debug!(
                ?target,
                %duration,
                idle_ms = burst.idle_for.as_millis() as u64,
                "returned from idle"
            );
            self.observer.on_idle_return(target, duration, burst.idle_for);
        }
        state.rearm_all(target, &mut self.scheduler);
    }

    /// Handle an elapsed deadline from the clock.
    ///
    /// Deadlines that were cancelled or superseded are ignored.
    pub fn fire_deadline(&mut self, deadline: Deadline<T>) {
        let Deadline {
            target,
            duration,
            timer,
        } = deadline;
        let Some(state) = self.targets.get_mut(&target) else {
            trace!(?target, "deadline for unwatched target");
            return;
        };
        if !state.elapse(duration, timer) {
            trace!(?target, timer = timer.as_u64(), "stale deadline ignored");
            return;
        }
        debug!(?target, %duration, "idle timeout");
        self.observer.on_idle_timeout(&target, duration);
    }

    pub fn is_watching(&self, target: &T) -> bool {
        self.targets.contains_key(target)
    }

    /// Registered durations for `target`, ascending. Empty if none.
    pub fn durations(&self, target: &T) -> Vec<IdleDuration> {
        self.targets
            .get(target)
            .map(TargetState::durations)
            .unwrap_or_default()
    }

    pub fn status(&self, target: &T, duration: IdleDuration) -> Option<WatcherStatus> {
        self.targets.get(target)?.status(duration)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn clock(&self) -> &C {
        self.scheduler.clock()
    }

    pub fn clock_mut(&mut self) -> &mut C {
        self.scheduler.clock_mut()
    }

    fn discard(&mut self, target: &T) {
        let Some(mut state) = self.targets.remove(target) else {
            return;
        };
        state.clear(&mut self.scheduler);
        if let Some(subscription) = state.take_subscription() {
            self.source.unsubscribe(subscription);
        }
        debug!(?target, "stopped watching target");
    }
}
