//! CoordinatorHandle - Client interface to a running Coordinator

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use super::error::CoordError;
use super::listener::{Listener, Subscription};
use super::messages::{CoordRequest, CoordinatorMetrics, RefreshResult, Snapshot, Status};
use crate::events::{CoordEvent, EventBus};

/// Handle for interacting with a Coordinator
///
/// This handle is cloneable and cheap to pass around. Reads (`get_cached`,
/// `snapshot`, `status`) are synchronous and never reach the coordinator
/// task; everything else is a request to it.
pub struct CoordinatorHandle<T> {
    /// Sender to the Coordinator task
    tx: mpsc::Sender<CoordRequest<T>>,

    /// Latest published state
    state_rx: watch::Receiver<Snapshot<T>>,

    events: EventBus,
    name: String,
    resource_id: String,
}

impl<T> Clone for CoordinatorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state_rx: self.state_rx.clone(),
            events: self.events.clone(),
            name: self.name.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

impl<T> CoordinatorHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        tx: mpsc::Sender<CoordRequest<T>>,
        state_rx: watch::Receiver<Snapshot<T>>,
        events: EventBus,
        name: String,
        resource_id: String,
    ) -> Self {
        debug!(%name, %resource_id, "CoordinatorHandle::new: called");
        Self {
            tx,
            state_rx,
            events,
            name,
            resource_id,
        }
    }

    /// Coordinator name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the resource this coordinator polls
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Register a listener
    ///
    /// The coordinator keeps only a weak reference: dropping the last `Arc`
    /// ends the registration. Registering the same listener twice returns the
    /// same subscription.
    pub async fn register<L>(&self, listener: &Arc<L>) -> Result<Subscription, CoordError>
    where
        L: Listener<T> + 'static,
    {
        debug!(name = %self.name, "CoordinatorHandle::register: called");
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn Listener<T>> = weak;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::Register {
            listener: weak,
            reply_tx,
        })
        .await?;

        let subscription = reply_rx.await.map_err(|_| CoordError::Stopped)?;
        debug!(subscription = subscription.id(), "CoordinatorHandle::register: registered");
        Ok(subscription)
    }

    /// Remove a listener
    ///
    /// Once this returns the listener receives no further notifications. A
    /// no-op if the subscription is already gone or the coordinator stopped.
    pub async fn unregister(&self, subscription: Subscription) {
        debug!(name = %self.name, subscription = subscription.id(), "CoordinatorHandle::unregister: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .send(CoordRequest::Unregister { subscription, reply_tx })
            .await
            .is_err()
        {
            debug!("CoordinatorHandle::unregister: coordinator stopped");
            return;
        }
        let _ = reply_rx.await;
    }

    /// Trigger a refresh, or join the one already in flight
    ///
    /// Resolves after the cache has been updated and listeners notified.
    pub async fn request_refresh(&self) -> RefreshResult<T> {
        debug!(name = %self.name, "CoordinatorHandle::request_refresh: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::Refresh { reply_tx }).await?;

        debug!("CoordinatorHandle::request_refresh: waiting for result");
        reply_rx.await.map_err(|_| CoordError::Stopped)?
    }

    /// Push a value obtained outside the fetcher
    ///
    /// Listeners are notified and the periodic timer restarts its interval.
    pub async fn set_updated(&self, value: T) -> Result<(), CoordError> {
        debug!(name = %self.name, "CoordinatorHandle::set_updated: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::SetUpdated { value, reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::Stopped)
    }

    /// Last successfully fetched value, without triggering a fetch
    pub fn get_cached(&self) -> Option<T> {
        self.state_rx.borrow().value.clone()
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.state_rx.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.state_rx.borrow().status
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state_rx.borrow().last_update
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == Status::Stopped
    }

    /// Wait until the published state changes, returning the new snapshot
    pub async fn changed(&mut self) -> Result<Snapshot<T>, CoordError> {
        self.state_rx.changed().await.map_err(|_| CoordError::Stopped)?;
        Ok(self.state_rx.borrow_and_update().clone())
    }

    /// Subscribe to lifecycle events emitted after this call
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordEvent> {
        self.events.subscribe()
    }

    /// Get current coordinator metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics, CoordError> {
        debug!(name = %self.name, "CoordinatorHandle::metrics: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::Stopped)
    }

    /// Tear the coordinator down
    ///
    /// Idempotent. When this returns no listener will be notified again.
    pub async fn shutdown(&self) {
        debug!(name = %self.name, "CoordinatorHandle::shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.send(CoordRequest::Shutdown { reply_tx }).await.is_err() {
            debug!("CoordinatorHandle::shutdown: already stopped");
            return;
        }
        let _ = reply_rx.await;
    }

    async fn send(&self, req: CoordRequest<T>) -> Result<(), CoordError> {
        if self.is_stopped() {
            return Err(CoordError::Stopped);
        }
        self.tx.send(req).await.map_err(|_| CoordError::Stopped)
    }
}
