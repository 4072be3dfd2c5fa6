//! Main Coordinator task implementation

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::CoordinatorConfig;
use super::error::CoordError;
use super::fetcher::Fetcher;
use super::handle::CoordinatorHandle;
use super::listener::{Listener, Subscription, Update};
use super::messages::{CoordRequest, CoordinatorMetrics, RefreshResult, Snapshot, Status};
use crate::events::{CoordEvent, EventBus};

/// What started a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Request,
    Start,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::Request => "request",
            Trigger::Start => "start",
        }
    }
}

/// Result of a spawned fetch, sent back to the coordinator task
struct FetchOutcome<T> {
    refresh_id: String,
    result: RefreshResult<T>,
}

/// The single fetch allowed in flight, plus every caller waiting on it
struct InFlight<T> {
    refresh_id: String,
    started: Instant,
    waiters: Vec<oneshot::Sender<RefreshResult<T>>>,
}

/// The Coordinator keeps the latest value of one resource fresh
///
/// Build it, take handles, then hand it to a tokio task with [`Coordinator::run`]
/// (or use [`Coordinator::spawn`] for both steps). All state transitions happen
/// on that task, which is the single point of mutual exclusion.
pub struct Coordinator<T> {
    config: CoordinatorConfig,
    fetcher: Arc<dyn Fetcher<T>>,
    tx: mpsc::Sender<CoordRequest<T>>,
    rx: mpsc::Receiver<CoordRequest<T>>,
    state_tx: watch::Sender<Snapshot<T>>,
    events: EventBus,
}

impl<T> Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new Coordinator with its own event bus
    pub fn new<F: Fetcher<T>>(config: CoordinatorConfig, fetcher: F) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self::with_event_bus(config, fetcher, events)
    }

    /// Create a new Coordinator emitting onto a shared event bus
    pub fn with_event_bus<F: Fetcher<T>>(config: CoordinatorConfig, fetcher: F, events: EventBus) -> Self {
        debug!(name = %config.name, resource_id = %config.resource_id, "Coordinator::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (state_tx, _) = watch::channel(Snapshot::default());
        Self {
            config,
            fetcher: Arc::new(fetcher),
            tx,
            rx,
            state_tx,
            events,
        }
    }

    /// Create and start a Coordinator, returning a handle and the task's JoinHandle
    pub fn spawn<F: Fetcher<T>>(config: CoordinatorConfig, fetcher: F) -> (CoordinatorHandle<T>, JoinHandle<()>) {
        let coordinator = Self::new(config, fetcher);
        let handle = coordinator.handle();
        (handle, tokio::spawn(coordinator.run()))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Create a handle for interacting with the Coordinator
    pub fn handle(&self) -> CoordinatorHandle<T> {
        CoordinatorHandle::new(
            self.tx.clone(),
            self.state_tx.subscribe(),
            self.events.clone(),
            self.config.name.clone(),
            self.config.resource_id.clone(),
        )
    }

    /// Run the Coordinator task
    ///
    /// This consumes the Coordinator and runs until `shutdown` is requested or
    /// every handle has been dropped.
    pub async fn run(self) {
        let Coordinator {
            config,
            fetcher,
            tx,
            mut rx,
            state_tx,
            events,
        } = self;
        // Only handles keep the request channel open
        drop(tx);

        let (done_tx, mut done_rx) = mpsc::channel(1);
        let ticker = config.refresh_interval().and_then(|period| match Instant::now().checked_add(period) {
            Some(start) => {
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            None => {
                warn!(name = %config.name, ?period, "Refresh interval out of range, periodic refresh disabled");
                None
            }
        });

        let mut task = CoordinatorTask {
            config,
            fetcher,
            state_tx,
            events,
            done_tx,
            ticker,
            listeners: BTreeMap::new(),
            next_subscription: 1,
            in_flight: None,
            metrics: CoordinatorMetrics::default(),
        };

        info!(
            name = %task.config.name,
            resource_id = %task.config.resource_id,
            interval = ?task.config.refresh_interval(),
            "Coordinator started"
        );

        if task.config.refresh_on_start {
            task.start_refresh(Trigger::Start, None);
        }

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(CoordRequest::Shutdown { reply_tx }) => {
                        info!(name = %task.config.name, "Coordinator shutting down");
                        task.teardown();
                        let _ = reply_tx.send(());
                        break;
                    }
                    Some(req) => task.handle_request(req),
                    None => {
                        info!(name = %task.config.name, "All handles dropped, coordinator shutting down");
                        task.teardown();
                        break;
                    }
                },
                Some(outcome) = done_rx.recv() => task.complete(outcome),
                _ = next_tick(&mut task.ticker) => task.start_refresh(Trigger::Timer, None),
            }
        }

        info!(name = %task.config.name, "Coordinator stopped");
    }
}

/// Wait for the next periodic tick, forever when periodic refresh is disabled
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run one fetch with the optional deadline, converting every failure mode
async fn run_fetch<T>(fetcher: Arc<dyn Fetcher<T>>, resource_id: String, timeout: Option<Duration>) -> RefreshResult<T>
where
    T: Send + 'static,
{
    let fetch = AssertUnwindSafe(fetcher.fetch(&resource_id)).catch_unwind();
    let outcome = match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, fetch).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(CoordError::Timeout(deadline)),
        },
        None => fetch.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CoordError::fetch_failed(e)),
        Err(_) => Err(CoordError::FetchFailed("fetch panicked".to_string())),
    }
}

/// State owned by the running coordinator task
struct CoordinatorTask<T> {
    config: CoordinatorConfig,
    fetcher: Arc<dyn Fetcher<T>>,
    state_tx: watch::Sender<Snapshot<T>>,
    events: EventBus,
    done_tx: mpsc::Sender<FetchOutcome<T>>,
    ticker: Option<Interval>,
    listeners: BTreeMap<u64, Weak<dyn Listener<T>>>,
    next_subscription: u64,
    in_flight: Option<InFlight<T>>,
    metrics: CoordinatorMetrics,
}

impl<T> CoordinatorTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn handle_request(&mut self, req: CoordRequest<T>) {
        match req {
            CoordRequest::Register { listener, reply_tx } => {
                let existing = self
                    .listeners
                    .iter()
                    .find(|(_, registered)| Weak::ptr_eq(registered, &listener))
                    .map(|(id, _)| *id);

                let id = match existing {
                    Some(id) => {
                        debug!(subscription = id, "Listener already registered");
                        id
                    }
                    None => {
                        let id = self.next_subscription;
                        self.next_subscription += 1;
                        self.listeners.insert(id, listener);
                        debug!(subscription = id, "Registered listener");
                        id
                    }
                };
                self.metrics.registered_listeners = self.listeners.len();
                let _ = reply_tx.send(Subscription(id));
            }

            CoordRequest::Unregister { subscription, reply_tx } => {
                if self.listeners.remove(&subscription.id()).is_some() {
                    debug!(subscription = subscription.id(), "Unregistered listener");
                } else {
                    debug!(subscription = subscription.id(), "Unregister: not registered");
                }
                self.metrics.registered_listeners = self.listeners.len();
                let _ = reply_tx.send(());
            }

            CoordRequest::Refresh { reply_tx } => {
                self.metrics.refresh_requests += 1;
                self.start_refresh(Trigger::Request, Some(reply_tx));
            }

            CoordRequest::SetUpdated { value, reply_tx } => {
                let now = Utc::now();
                self.state_tx.send_modify(|state| {
                    state.value = Some(value.clone());
                    state.last_update = Some(now);
                    if state.status != Status::Refreshing {
                        state.status = Status::Idle;
                    }
                    state.last_error = None;
                    state.last_update_success = true;
                });
                if let Some(ticker) = self.ticker.as_mut() {
                    ticker.reset();
                }

                let notified = self.notify(&Update::Refreshed { value, at: now });
                debug!(name = %self.config.name, notified, "Value set out of band");
                self.events.emit(CoordEvent::ValueSet {
                    coordinator: self.config.name.clone(),
                    resource_id: self.config.resource_id.clone(),
                    listeners_notified: notified,
                });
                let _ = reply_tx.send(());
            }

            CoordRequest::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.metrics.clone());
            }

            // Handled by the run loop
            CoordRequest::Shutdown { reply_tx } => {
                let _ = reply_tx.send(());
            }
        }
    }

    /// Start a fetch, or attach the waiter to the one already in flight
    fn start_refresh(&mut self, trigger: Trigger, waiter: Option<oneshot::Sender<RefreshResult<T>>>) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            debug!(
                refresh_id = %in_flight.refresh_id,
                trigger = trigger.as_str(),
                "Refresh already in flight, joining"
            );
            if let Some(waiter) = waiter {
                in_flight.waiters.push(waiter);
                self.metrics.requests_joined += 1;
            }
            return;
        }

        let refresh_id = Uuid::now_v7().to_string();
        debug!(%refresh_id, trigger = trigger.as_str(), "Starting refresh");

        self.state_tx.send_modify(|state| state.status = Status::Refreshing);
        self.metrics.fetches_started += 1;
        self.events.emit(CoordEvent::RefreshStarted {
            coordinator: self.config.name.clone(),
            resource_id: self.config.resource_id.clone(),
            refresh_id: refresh_id.clone(),
            trigger: trigger.as_str().to_string(),
        });

        let fetcher = Arc::clone(&self.fetcher);
        let resource_id = self.config.resource_id.clone();
        let timeout = self.config.fetch_timeout();
        let done_tx = self.done_tx.clone();
        let id = refresh_id.clone();
        tokio::spawn(async move {
            let result = run_fetch(fetcher, resource_id, timeout).await;
            // Fails only after teardown, where the result is discarded
            let _ = done_tx.send(FetchOutcome { refresh_id: id, result }).await;
        });

        self.in_flight = Some(InFlight {
            refresh_id,
            started: Instant::now(),
            waiters: waiter.into_iter().collect(),
        });
    }

    /// Apply a finished fetch: update state, then notify listeners, then answer waiters
    fn complete(&mut self, outcome: FetchOutcome<T>) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.refresh_id == outcome.refresh_id => in_flight,
            other => {
                warn!(refresh_id = %outcome.refresh_id, "Discarding result of unknown refresh");
                self.in_flight = other;
                return;
            }
        };

        let now = Utc::now();
        let duration_ms = u64::try_from(in_flight.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome.result {
            Ok(value) => {
                self.state_tx.send_modify(|state| {
                    state.value = Some(value.clone());
                    state.last_update = Some(now);
                    state.status = Status::Idle;
                    state.last_error = None;
                    state.last_update_success = true;
                    state.refresh_count += 1;
                });
                self.metrics.fetches_succeeded += 1;

                let notified = self.notify(&Update::Refreshed {
                    value: value.clone(),
                    at: now,
                });
                debug!(refresh_id = %in_flight.refresh_id, duration_ms, notified, "Refresh succeeded");
                self.events.emit(CoordEvent::RefreshSucceeded {
                    coordinator: self.config.name.clone(),
                    resource_id: self.config.resource_id.clone(),
                    refresh_id: in_flight.refresh_id.clone(),
                    duration_ms,
                    listeners_notified: notified,
                });
            }
            Err(error) => {
                self.state_tx.send_modify(|state| {
                    state.status = Status::Failed;
                    state.last_error = Some(error.clone());
                    state.last_update_success = false;
                    state.refresh_count += 1;
                });
                self.metrics.fetches_failed += 1;

                let notified = self.notify(&Update::Failed {
                    error: error.clone(),
                    at: now,
                });
                warn!(
                    name = %self.config.name,
                    refresh_id = %in_flight.refresh_id,
                    error = %error,
                    "Refresh failed"
                );
                self.events.emit(CoordEvent::RefreshFailed {
                    coordinator: self.config.name.clone(),
                    resource_id: self.config.resource_id.clone(),
                    refresh_id: in_flight.refresh_id.clone(),
                    error: error.to_string(),
                    duration_ms,
                    listeners_notified: notified,
                });
            }
        }

        for waiter in in_flight.waiters {
            let _ = waiter.send(outcome.result.clone());
        }
    }

    /// Synchronous fan-out; returns how many listeners were notified
    ///
    /// Dropped listeners are pruned, panicking listeners are skipped.
    fn notify(&mut self, update: &Update<T>) -> usize {
        let mut notified = 0;
        let name = &self.config.name;
        let metrics = &mut self.metrics;

        self.listeners.retain(|id, registered| {
            let Some(listener) = registered.upgrade() else {
                debug!(subscription = *id, "Pruning dropped listener");
                return false;
            };
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_update(update))) {
                Ok(()) => notified += 1,
                Err(_) => {
                    warn!(%name, subscription = *id, "Listener panicked during notification");
                    metrics.listener_panics += 1;
                }
            }
            true
        });

        metrics.notifications_sent += notified as u64;
        metrics.registered_listeners = self.listeners.len();
        notified
    }

    /// Enter the terminal state: release listeners and answer pending callers
    fn teardown(&mut self) {
        self.ticker = None;
        self.listeners.clear();
        self.metrics.registered_listeners = 0;
        self.state_tx.send_modify(|state| state.status = Status::Stopped);

        if let Some(in_flight) = self.in_flight.take() {
            debug!(
                refresh_id = %in_flight.refresh_id,
                waiters = in_flight.waiters.len(),
                "Abandoning in-flight refresh"
            );
            for waiter in in_flight.waiters {
                let _ = waiter.send(Err(CoordError::Stopped));
            }
        }

        self.events.emit(CoordEvent::Stopped {
            coordinator: self.config.name.clone(),
            resource_id: self.config.resource_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<Update<u32>>>,
    }

    impl Recorder {
        fn successes(&self) -> Vec<u32> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter_map(|u| u.value().copied())
                .collect()
        }

        fn failures(&self) -> Vec<CoordError> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter_map(|u| u.error().cloned())
                .collect()
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    impl Listener<u32> for Recorder {
        fn on_update(&self, update: &Update<u32>) {
            self.updates.lock().unwrap().push(update.clone());
        }
    }

    struct Exploding;

    impl Listener<u32> for Exploding {
        fn on_update(&self, _update: &Update<u32>) {
            panic!("listener exploded");
        }
    }

    fn manual_config() -> CoordinatorConfig {
        CoordinatorConfig::new("test", "device-1").with_refresh_interval(Duration::ZERO)
    }

    /// Fetcher that blocks until a permit is added to the gate
    fn gated(value: u32) -> (impl Fetcher<u32>, Arc<AtomicUsize>, Arc<Semaphore>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = {
            let calls = calls.clone();
            let gate = gate.clone();
            move |_resource_id: String| {
                let calls = calls.clone();
                let gate = gate.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.acquire().await?.forget();
                    Ok::<u32, eyre::Report>(value)
                }
            }
        };
        (fetcher, calls, gate)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let (fetcher, calls, gate) = gated(42);
        let (handle, task) = Coordinator::spawn(manual_config(), fetcher);

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let h = handle.clone();
                tokio::spawn(async move { h.request_refresh().await })
            })
            .collect();

        for _ in 0..200 {
            if handle.metrics().await.unwrap().refresh_requests == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        gate.add_permits(1);
        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok(42));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.fetches_started, 1);
        assert_eq!(metrics.requests_joined, 4);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_success_updates_cache_before_notifying() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(42)
        });

        // Observes the cache from inside the callback
        let observer = handle.clone();
        let seen_in_callback = Arc::new(Mutex::new(None));
        let seen = seen_in_callback.clone();
        let listener = Arc::new(move |_update: &Update<u32>| {
            *seen.lock().unwrap() = Some((observer.get_cached(), observer.status()));
        });
        let recorder = Arc::new(Recorder::default());
        handle.register(&listener).await.unwrap();
        handle.register(&recorder).await.unwrap();

        assert_eq!(handle.get_cached(), None);
        assert_eq!(handle.request_refresh().await, Ok(42));

        assert_eq!(handle.get_cached(), Some(42));
        assert_eq!(handle.status(), Status::Idle);
        assert!(handle.last_update().is_some());
        assert_eq!(recorder.successes(), vec![42]);
        assert_eq!(*seen_in_callback.lock().unwrap(), Some((Some(42), Status::Idle)));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move |_id: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok::<u32, eyre::Report>(7)
                } else {
                    Err(eyre!("net"))
                }
            }
        };
        let (handle, task) = Coordinator::spawn(manual_config(), fetcher);
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        assert_eq!(handle.request_refresh().await, Ok(7));
        let err = handle.request_refresh().await.unwrap_err();
        assert_eq!(err, CoordError::FetchFailed("net".to_string()));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.value, Some(7));
        assert_eq!(snapshot.status, Status::Failed);
        assert_eq!(snapshot.last_error, Some(CoordError::FetchFailed("net".to_string())));
        assert!(!snapshot.last_update_success);
        assert_eq!(snapshot.refresh_count, 2);
        assert_eq!(recorder.successes(), vec![7]);
        assert_eq!(recorder.failures().len(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_without_previous_value() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Err::<u32, _>(eyre!("net"))
        });
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        assert!(handle.request_refresh().await.is_err());
        assert_eq!(handle.get_cached(), None);
        assert_eq!(handle.status(), Status::Failed);
        assert_eq!(recorder.count(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_success_then_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move |_id: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok::<u32, eyre::Report>(42)
                } else {
                    Err(eyre!("net"))
                }
            }
        };
        let config = CoordinatorConfig::new("test", "device-1").with_refresh_interval(Duration::from_secs(30));
        let (handle, task) = Coordinator::spawn(config, fetcher);
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(handle.get_cached(), Some(42));
        assert_eq!(handle.status(), Status::Idle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.get_cached(), Some(42));
        assert_eq!(handle.status(), Status::Failed);
        assert_eq!(recorder.failures(), vec![CoordError::FetchFailed("net".to_string())]);

        // Failures never cancel the timer
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let config = manual_config().with_fetch_timeout(Duration::from_secs(1));
        let (handle, task) = Coordinator::spawn(config, |_id: String| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<u32, eyre::Report>(1)
        });

        let err = handle.request_refresh().await.unwrap_err();
        assert_eq!(err, CoordError::Timeout(Duration::from_secs(1)));
        assert_eq!(handle.status(), Status::Failed);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_panic_is_contained() {
        let (handle, task) = Coordinator::spawn(manual_config(), |id: String| async move {
            if id == "device-1" {
                panic!("fetcher exploded");
            }
            Ok::<u32, eyre::Report>(1)
        });

        let err = handle.request_refresh().await.unwrap_err();
        assert_eq!(err, CoordError::FetchFailed("fetch panicked".to_string()));
        assert_eq!(handle.status(), Status::Failed);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_racing_in_flight_fetch() {
        let (fetcher, calls, gate) = gated(5);
        let (handle, task) = Coordinator::spawn(manual_config(), fetcher);
        let leaving = Arc::new(Recorder::default());
        let staying = Arc::new(Recorder::default());
        let subscription = handle.register(&leaving).await.unwrap();
        handle.register(&staying).await.unwrap();

        let h = handle.clone();
        let caller = tokio::spawn(async move { h.request_refresh().await });
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        handle.unregister(subscription).await;
        // Second unregister is a no-op
        handle.unregister(subscription).await;
        gate.add_permits(1);

        assert_eq!(caller.await.unwrap(), Ok(5));
        assert_eq!(leaving.count(), 0);
        assert_eq!(staying.successes(), vec![5]);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(3)
        });
        let recorder = Arc::new(Recorder::default());

        let first = handle.register(&recorder).await.unwrap();
        let second = handle.register(&recorder).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(handle.metrics().await.unwrap().registered_listeners, 1);

        handle.request_refresh().await.unwrap();
        assert_eq!(recorder.count(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_listener_is_pruned() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(3)
        });
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();
        drop(recorder);

        handle.request_refresh().await.unwrap();
        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.registered_listeners, 0);
        assert_eq!(metrics.notifications_sent, 0);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(9)
        });
        let bad = Arc::new(Exploding);
        let good = Arc::new(Recorder::default());
        handle.register(&bad).await.unwrap();
        handle.register(&good).await.unwrap();

        assert_eq!(handle.request_refresh().await, Ok(9));
        assert_eq!(good.successes(), vec![9]);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.listener_panics, 1);
        assert_eq!(metrics.notifications_sent, 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_with_fetch_in_flight() {
        let (fetcher, calls, gate) = gated(1);
        let (handle, task) = Coordinator::spawn(manual_config(), fetcher);
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        let h = handle.clone();
        let caller = tokio::spawn(async move { h.request_refresh().await });
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        handle.shutdown().await;
        assert_eq!(caller.await.unwrap(), Err(CoordError::Stopped));

        // Let the abandoned fetch finish; nobody hears about it
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.count(), 0);
        assert_eq!(handle.status(), Status::Stopped);
        assert_eq!(handle.get_cached(), None);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_are_stopped() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(1)
        });
        handle.request_refresh().await.unwrap();
        handle.shutdown().await;
        task.await.unwrap();

        let recorder = Arc::new(Recorder::default());
        assert_eq!(handle.request_refresh().await, Err(CoordError::Stopped));
        assert_eq!(handle.register(&recorder).await, Err(CoordError::Stopped));
        assert_eq!(handle.set_updated(2).await, Err(CoordError::Stopped));
        assert!(handle.metrics().await.is_err());
        handle.unregister(Subscription(1)).await;
        handle.shutdown().await;

        // The last value stays readable
        assert_eq!(handle.get_cached(), Some(1));
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_task() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(1)
        });
        let mut events = handle.subscribe_events();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("coordinator should exit")
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type(), "Stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_updated_resets_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move |_id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<u32, eyre::Report>(1) }
        };
        let config = CoordinatorConfig::new("test", "device-1").with_refresh_interval(Duration::from_secs(30));
        let (handle, task) = Coordinator::spawn(config, fetcher);
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        handle.set_updated(99).await.unwrap();
        assert_eq!(handle.get_cached(), Some(99));
        assert_eq!(recorder.successes(), vec![99]);

        // Original tick at 30s was pushed back to 50s
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.get_cached(), Some(1));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_on_start() {
        let config = manual_config().with_refresh_on_start(true);
        let (handle, task) = Coordinator::spawn(config, |_id: String| async move {
            Ok::<u32, eyre::Report>(42)
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.get_cached(), Some(42));
        assert_eq!(handle.metrics().await.unwrap().fetches_started, 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_tick_joins_in_flight_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move |_id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_secs(20)).await;
                Ok::<u32, eyre::Report>(1)
            }
        };
        let config = CoordinatorConfig::new("test", "device-1").with_refresh_interval(Duration::from_secs(30));
        let (handle, task) = Coordinator::spawn(config, fetcher);
        let recorder = Arc::new(Recorder::default());
        handle.register(&recorder).await.unwrap();

        // Manual request at 25s, fetch runs until 45s, tick at 30s lands inside it
        tokio::time::sleep(Duration::from_secs(25)).await;
        let h = handle.clone();
        let caller = tokio::spawn(async move { h.request_refresh().await });

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(caller.await.unwrap(), Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.successes(), vec![1]);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.fetches_started, 1);
        assert_eq!(metrics.refresh_requests, 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_second_interval_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move |_id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<u32, eyre::Report>(1) }
        };
        let config = CoordinatorConfig::new("test", "device-1").with_refresh_interval(Duration::from_millis(500));
        let (handle, task) = Coordinator::spawn(config, fetcher);

        tokio::time::sleep(Duration::from_millis(2250)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(handle.get_cached(), Some(1));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_interval_disables_timer() {
        let mut config = CoordinatorConfig::new("test", "device-1");
        config.refresh_interval_secs = u64::MAX;
        let (handle, task) = Coordinator::spawn(config, |_id: String| async move {
            Ok::<u32, eyre::Report>(8)
        });

        assert_eq!(handle.request_refresh().await, Ok(8));
        assert_eq!(handle.status(), Status::Idle);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_events() {
        let (handle, task) = Coordinator::spawn(manual_config(), |_id: String| async move {
            Ok::<u32, eyre::Report>(42)
        });
        let mut events = handle.subscribe_events();

        handle.request_refresh().await.unwrap();

        let started = events.recv().await.unwrap();
        let succeeded = events.recv().await.unwrap();
        assert_eq!(started.event_type(), "RefreshStarted");
        assert_eq!(succeeded.event_type(), "RefreshSucceeded");
        assert_eq!(started.refresh_id(), succeeded.refresh_id());
        assert_eq!(succeeded.resource_id(), "device-1");

        handle.shutdown().await;
        task.await.unwrap();
    }
}
