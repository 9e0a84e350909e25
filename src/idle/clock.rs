//! Time source and deferred-deadline primitive consumed by the registry.

use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;

use super::IdleDuration;

/// Identity of one armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A deadline handed to the clock and handed back to the registry once it elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline<T> {
    pub target: T,
    pub duration: IdleDuration,
    pub timer: TimerId,
}

/// Monotonic time plus "run no earlier than `delay` from now".
///
/// Implementations deliver each elapsed [`Deadline`] back to
/// [`IdleTimerRegistry::fire_deadline`](super::IdleTimerRegistry::fire_deadline).
/// Cancelling a timer that already fired, or was never armed, must be a no-op.
pub trait Clock<T> {
    fn now(&self) -> Instant;

    fn after(&mut self, delay: Duration, deadline: Deadline<T>);

    fn cancel(&mut self, timer: TimerId);
}

/// Allocates timer ids and arms absolute deadlines on a [`Clock`].
pub(crate) struct Scheduler<T, C> {
    clock: C,
    next_timer: u64,
    _target: PhantomData<fn() -> T>,
}

impl<T: Clone, C: Clock<T>> Scheduler<T, C> {
    pub(crate) fn new(clock: C) -> Self {
        Self {
            clock,
            next_timer: 0,
            _target: PhantomData,
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Arm a deadline at `at`. A deadline already in the past fires on the next tick.
    pub(crate) fn arm(&mut self, target: &T, duration: IdleDuration, at: Instant) -> TimerId {
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        let delay = at.saturating_duration_since(self.clock.now());
        self.clock.after(
            delay,
            Deadline {
                target: target.clone(),
                duration,
                timer,
            },
        );
        timer
    }

    pub(crate) fn cancel(&mut self, timer: TimerId) {
        self.clock.cancel(timer);
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    pub(crate) fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }
}

/// Hand-driven clock for deterministic registry tests.
#[cfg(test)]
pub(crate) struct ManualClock<T> {
    now: Instant,
    pending: Vec<(Instant, Deadline<T>)>,
}

#[cfg(test)]
impl<T> ManualClock<T> {
    pub(crate) fn new() -> Self {
        Self {
            now: Instant::now(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn due_at(&self, duration: IdleDuration) -> Option<Instant> {
        self.pending
            .iter()
            .find(|(_, d)| d.duration == duration)
            .map(|(at, _)| *at)
    }

    /// Pop the earliest deadline due at or before `until`, moving time up to it.
    pub(crate) fn next_due(&mut self, until: Instant) -> Option<Deadline<T>> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= until)
            .min_by_key(|(_, (at, d))| (*at, d.timer))
            .map(|(idx, _)| idx)?;
        let (at, deadline) = self.pending.remove(idx);
        if at > self.now {
            self.now = at;
        }
        Some(deadline)
    }

    pub(crate) fn set_now(&mut self, at: Instant) {
        self.now = at;
    }
}

#[cfg(test)]
impl<T> Clock<T> for ManualClock<T> {
    fn now(&self) -> Instant {
        self.now
    }

    fn after(&mut self, delay: Duration, deadline: Deadline<T>) {
        self.pending.push((self.now + delay, deadline));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.pending.retain(|(_, d)| d.timer != timer);
    }
}
