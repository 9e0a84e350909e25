//! Tokio host for the idle timer registry.
//!
//! One task owns the [`IdleTimerRegistry`]. Commands, activity signals and
//! elapsed deadlines all arrive on the same channel and are handled one at a
//! time, so no update on a target ever interleaves with another.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::clock::{Clock, Deadline};
use super::{
    ActivitySource, IdleDuration, IdleError, IdleEvent, IdleTimerRegistry, SubscriptionSet, TimerId,
};

/// Broadcast buffer used by [`IdleTimers::spawn`].
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

enum Command<T> {
    Register {
        target: T,
        duration_ms: u64,
        reply: oneshot::Sender<Result<(), IdleError>>,
    },
    Unregister {
        target: T,
        duration_ms: u64,
        reply: oneshot::Sender<()>,
    },
    UnregisterAll {
        target: T,
        reply: oneshot::Sender<()>,
    },
    IdleTime {
        target: T,
        reply: oneshot::Sender<Result<Duration, IdleError>>,
    },
    Durations {
        target: T,
        reply: oneshot::Sender<Vec<IdleDuration>>,
    },
    Activity(T),
    Deadline(Deadline<T>),
    Shutdown,
}

/// Clock backed by tokio timers: one sleeping task per armed deadline.
///
/// Elapsed deadlines are posted back to the service channel through a weak
/// sender, so pending timers never keep the service alive.
struct TokioClock<T> {
    /// Where elapsed deadlines are delivered (weak, so it never keeps the service alive)
    commands: mpsc::WeakUnboundedSender<Command<T>>,
    /// Pending sleep tasks
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl<T> TokioClock<T> {
    fn new(commands: mpsc::WeakUnboundedSender<Command<T>>) -> Self {
        Self {
            commands,
            timers: HashMap::new(),
        }
    }
}

impl<T: Send + 'static> Clock<T> for TokioClock<T> {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&mut self, delay: Duration, deadline: Deadline<T>) {
        self.timers.retain(|_, handle| !handle.is_finished());

        let timer = deadline.timer;
        let commands = self.commands.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Deadline(deadline));
            }
        });
        self.timers.insert(timer, handle);
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(handle) = self.timers.remove(&timer) {
            handle.abort();
        }
    }
}

impl<T> Drop for TokioClock<T> {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

type ServiceRegistry<T> =
    IdleTimerRegistry<T, TokioClock<T>, SubscriptionSet<T>, broadcast::Sender<IdleEvent<T>>>;

/// Handle to a running idle timer service.
///
/// Cloning the handle is cheap. The service stops on [`shutdown`](Self::shutdown)
/// or once every handle has been dropped.
pub struct IdleTimers<T> {
    /// Command channel into the service task
    commands: mpsc::UnboundedSender<Command<T>>,
    /// Idle events fan-out
    events: broadcast::Sender<IdleEvent<T>>,
}

impl<T> Clone for IdleTimers<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T> IdleTimers<T>
where
    T: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Start the service on the current tokio runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Start the service with a broadcast buffer of `capacity` events per receiver.
    pub fn with_event_capacity(capacity: usize) -> (Self, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(capacity);

        let clock = TokioClock::new(commands.downgrade());
        let registry = IdleTimerRegistry::new(clock, SubscriptionSet::new(), events.clone());
        let worker = tokio::spawn(run(registry, commands_rx));

        (Self { commands, events }, worker)
    }

    /// Receive every timeout and return from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<IdleEvent<T>> {
        self.events.subscribe()
    }

    pub async fn register(&self, target: T, duration_ms: u64) -> Result<(), IdleError> {
        self.request(|reply| Command::Register {
            target,
            duration_ms,
            reply,
        })
        .await?
    }

    pub async fn register_default(&self, target: T) -> Result<(), IdleError> {
        self.register(target, IdleDuration::DEFAULT.as_millis()).await
    }

    pub async fn unregister(&self, target: T, duration_ms: u64) -> Result<(), IdleError> {
        self.request(|reply| Command::Unregister {
            target,
            duration_ms,
            reply,
        })
        .await
    }

    pub async fn unregister_default(&self, target: T) -> Result<(), IdleError> {
        self.unregister(target, IdleDuration::DEFAULT.as_millis()).await
    }

    pub async fn unregister_all(&self, target: T) -> Result<(), IdleError> {
        self.request(|reply| Command::UnregisterAll { target, reply })
            .await
    }

    pub async fn idle_time(&self, target: T) -> Result<Duration, IdleError> {
        self.request(|reply| Command::IdleTime { target, reply })
            .await?
    }

    pub async fn durations(&self, target: T) -> Result<Vec<IdleDuration>, IdleError> {
        self.request(|reply| Command::Durations { target, reply })
            .await
    }

    /// Report activity on `target`. Ignored unless the target is watched.
    pub fn activity(&self, target: T) -> Result<(), IdleError> {
        self.commands
            .send(Command::Activity(target))
            .map_err(|_| IdleError::ServiceClosed)
    }

    /// Ask the service to stop. Pending deadlines are cancelled.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command<T>,
    ) -> Result<R, IdleError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| IdleError::ServiceClosed)?;
        response.await.map_err(|_| IdleError::ServiceClosed)
    }
}

async fn run<T>(mut registry: ServiceRegistry<T>, mut commands: mpsc::UnboundedReceiver<Command<T>>)
where
    T: Clone + Eq + Hash + Debug + Send + 'static,
{
    debug!("Idle timer service started");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register {
                target,
                duration_ms,
                reply,
            } => {
                let result = registry.register(target, duration_ms).map(|_| ());
                let _ = reply.send(result);
            }
            Command::Unregister {
                target,
                duration_ms,
                reply,
            } => {
                registry.unregister(&target, duration_ms);
                let _ = reply.send(());
            }
            Command::UnregisterAll { target, reply } => {
                registry.unregister_all(&target);
                let _ = reply.send(());
            }
            Command::IdleTime { target, reply } => {
                let _ = reply.send(registry.idle_time(&target));
            }
            Command::Durations { target, reply } => {
                let _ = reply.send(registry.durations(&target));
            }
            Command::Activity(target) => {
                if registry.source().is_subscribed(&target) {
                    registry.record_activity(&target);
                } else {
                    trace!(?target, "dropping activity for unsubscribed target");
                }
            }
            Command::Deadline(deadline) => registry.fire_deadline(deadline),
            Command::Shutdown => break,
        }
    }

    debug!(
        targets = registry.target_count(),
        "Idle timer service stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;
    use tokio_test::{assert_err, assert_ok};

    // Paused clock: time only moves when every task is idle, jumping to the
    // next timer.

    const DOC: &str = "document";

    fn doc() -> String {
        DOC.to_string()
    }

    fn ms(v: u64) -> IdleDuration {
        IdleDuration::from_millis(v).unwrap()
    }

    fn assert_near(actual: Duration, expected: Duration) {
        let drift = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            drift <= Duration::from_millis(5),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_return() {
        let (timers, _worker) = IdleTimers::spawn();
        let mut events = timers.subscribe();
        let start = Instant::now();

        assert_ok!(timers.register(doc(), 30_000).await);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            IdleEvent::Timeout {
                target: doc(),
                duration: ms(30_000)
            }
        );
        assert_near(start.elapsed(), Duration::from_secs(30));

        time::sleep_until(start + Duration::from_secs(40)).await;
        assert_ok!(timers.activity(doc()));

        match events.recv().await.unwrap() {
            IdleEvent::Return {
                target,
                duration,
                idle_for,
            } => {
                assert_eq!(target, doc());
                assert_eq!(duration, ms(30_000));
                assert_near(idle_for, Duration::from_secs(40));
            }
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_durations_on_one_target() {
        let (timers, _worker) = IdleTimers::spawn();
        let mut events = timers.subscribe();
        let start = Instant::now();

        assert_ok!(timers.register(doc(), 30_000).await);
        assert_ok!(timers.register(doc(), 60_000).await);

        let first = events.recv().await.unwrap();
        assert_eq!(first.target(), &doc());
        assert_eq!(first.duration(), ms(30_000));
        assert_near(start.elapsed(), Duration::from_secs(30));
        let second = events.recv().await.unwrap();
        assert_eq!(second.target(), &doc());
        assert_eq!(second.duration(), ms(60_000));
        assert_near(start.elapsed(), Duration::from_secs(60));

        time::sleep_until(start + Duration::from_secs(90)).await;
        assert_ok!(timers.activity(doc()));

        let mut returned = Vec::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                IdleEvent::Return {
                    duration, idle_for, ..
                } => {
                    assert_near(idle_for, Duration::from_secs(90));
                    returned.push(duration);
                }
                other => panic!("expected return, got {other:?}"),
            }
        }
        returned.sort();
        assert_eq!(returned, vec![ms(30_000), ms(60_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_timeout() {
        let (timers, _worker) = IdleTimers::spawn();
        let mut events = timers.subscribe();
        let start = Instant::now();

        assert_ok!(timers.register(doc(), 30_000).await);
        time::sleep(Duration::from_secs(20)).await;
        assert_ok!(timers.activity(doc()));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, IdleEvent::Timeout { .. }));
        assert_near(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_target_goes_quiet() {
        let (timers, _worker) = IdleTimers::spawn();
        let mut events = timers.subscribe();

        assert_ok!(timers.register(doc(), 30_000).await);
        time::sleep(Duration::from_secs(10)).await;
        assert_ok!(timers.unregister(doc(), 30_000).await);
        assert_ok!(timers.unregister(doc(), 30_000).await);

        time::sleep(Duration::from_secs(120)).await;
        assert_ok!(timers.activity(doc()));
        time::sleep(Duration::from_secs(1)).await;

        assert!(events.try_recv().is_err());
        assert_eq!(
            assert_err!(timers.idle_time(doc()).await),
            IdleError::NoTimerRegistered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_all_clears_durations() {
        let (timers, _worker) = IdleTimers::spawn();

        assert_ok!(timers.register_default(doc()).await);
        assert_ok!(timers.register(doc(), 60_000).await);
        assert_ok!(timers.register(doc(), 60_000).await);
        assert_eq!(
            assert_ok!(timers.durations(doc()).await),
            vec![IdleDuration::DEFAULT, ms(60_000)]
        );

        assert_ok!(timers.unregister_default(doc()).await);
        assert_eq!(assert_ok!(timers.durations(doc()).await), vec![ms(60_000)]);

        assert_ok!(timers.unregister_all(doc()).await);
        assert_ok!(timers.unregister_all(doc()).await);
        assert!(assert_ok!(timers.durations(doc()).await).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_reflects_elapsed_time() {
        let (timers, _worker) = IdleTimers::spawn();

        assert_ok!(timers.register(doc(), 30_000).await);
        assert_near(assert_ok!(timers.idle_time(doc()).await), Duration::ZERO);

        time::sleep(Duration::from_secs(7)).await;
        assert_near(
            assert_ok!(timers.idle_time(doc()).await),
            Duration::from_secs(7),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_duration_is_rejected() {
        let (timers, _worker) = IdleTimers::spawn();

        assert_eq!(
            assert_err!(timers.register(doc(), 0).await),
            IdleError::InvalidDuration
        );
        assert!(assert_ok!(timers.durations(doc()).await).is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_service() {
        let (timers, worker) = IdleTimers::<String>::spawn();
        assert_ok!(timers.register(doc(), 30_000).await);

        timers.shutdown();
        worker.await.unwrap();

        assert!(timers.is_closed());
        assert_eq!(
            assert_err!(timers.register(doc(), 30_000).await),
            IdleError::ServiceClosed
        );
        assert_eq!(assert_err!(timers.activity(doc())), IdleError::ServiceClosed);
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_worker() {
        let (timers, worker) = IdleTimers::<String>::spawn();
        assert_ok!(timers.register(doc(), 30_000).await);

        drop(timers);
        worker.await.unwrap();
    }
}
