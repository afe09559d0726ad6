//! Live trace events and the in-process event bus.
//!
//! Every `/check` observation and every freeze lifecycle transition is
//! published as a [`TraceEvent`]. Events are ephemeral: they exist only to
//! be fanned out to currently-connected watchers and are never stored.
//!
//! # Slow-consumer policy
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: when a
//! subscriber's queue is full the event is dropped for that subscriber
//! only. Per-subscriber ordering matches publish order; no ordering is
//! guaranteed across subscribers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;

/// Queue depth for each subscriber.
///
/// A watcher that falls more than this many events behind starts losing
/// events rather than back-pressuring the publisher.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 128;

/// Service name used for synthesized freeze lifecycle events.
const LIFECYCLE_SERVICE: &str = "control-plane";

/// Endpoint used for synthesized freeze lifecycle events.
const LIFECYCLE_ENDPOINT: &str = "/freeze";

type SubscriberTable = Arc<RwLock<HashMap<u64, mpsc::Sender<TraceEvent>>>>;

/// A single observation of trace activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// The trace this event belongs to.
    pub trace_id: String,

    /// Service that observed the activity.
    pub service_name: String,

    /// Endpoint path the activity was observed on.
    pub endpoint: String,

    /// Unix seconds at publish time.
    pub timestamp: i64,

    /// Optional attributes (freeze lifecycle status, etc.).
    pub attributes: BTreeMap<String, String>,
}

impl TraceEvent {
    /// Builds an event for a request observed at a sidecar.
    #[must_use]
    pub fn observed(
        trace_id: impl Into<String>,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            timestamp: Utc::now().timestamp(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builds a freeze lifecycle event (`frozen`, `released`, `failed`).
    ///
    /// Lifecycle events travel the same stream as trace observations,
    /// attributed to the control plane itself with a `freeze_status`
    /// attribute.
    #[must_use]
    pub fn freeze_lifecycle(trace_id: impl Into<String>, status: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("freeze_status".to_string(), status.to_string());
        Self {
            trace_id: trace_id.into(),
            service_name: LIFECYCLE_SERVICE.to_string(),
            endpoint: LIFECYCLE_ENDPOINT.to_string(),
            timestamp: Utc::now().timestamp(),
            attributes,
        }
    }
}

/// Fan-out bus for [`TraceEvent`]s.
///
/// Publishing takes a read lock on the subscriber table and uses
/// non-blocking sends throughout.
#[derive(Debug)]
pub struct EventBus {
    subscribers: SubscriberTable,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(SUBSCRIBER_QUEUE_DEPTH)
    }
}

impl EventBus {
    /// Creates a bus whose subscribers each get a queue of `queue_depth`.
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            queue_depth,
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscriber is removed when the returned [`Subscription`] is
    /// dropped, so a watcher disconnecting mid-stream cleans itself up.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .expect("event bus poisoned")
            .insert(id, tx);

        tracing::debug!(subscriber_id = id, "Event subscriber attached");
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
            receiver: rx,
        }
    }

    /// Publishes an event to every live subscriber.
    ///
    /// Never blocks. Subscribers with full queues lose this event;
    /// subscribers whose receiver is gone are pruned.
    pub fn publish(&self, event: &TraceEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().expect("event bus poisoned");
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(subscriber_id = id, "Dropping event for slow subscriber");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().expect("event bus poisoned");
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("event bus poisoned").len()
    }
}

/// A live subscription to the event bus.
///
/// Receive with [`recv`](Self::recv); dropping the subscription detaches
/// the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: SubscriberTable,
    receiver: mpsc::Receiver<TraceEvent>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// Returns `None` only if the bus itself has been dropped, which does
    /// not happen while the control plane is running.
    pub async fn recv(&mut self) -> Option<TraceEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for draining in tests.
    pub fn try_recv(&mut self) -> Option<TraceEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            if subscribers.remove(&self.id).is_some() {
                tracing::debug!(subscriber_id = self.id, "Event subscriber detached");
            }
        }
    }
}
