//! Change-gated polling.
//!
//! A subscription polls its fetch function on a fixed interval and hands the
//! payload to its consumer only when the content differs from what was last
//! delivered. Failures (including a fetch that outlives the interval) are
//! logged and swallowed; the previous good payload stays current.
//!
//! Each subscription owns its state in a task spawned on the current tokio
//! runtime. Ticks never overlap: the next fetch starts only after the
//! previous one finished, and ticks missed meanwhile are skipped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SubscriptionId = Uuid;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hex SHA-256 of the payload's canonical JSON form.
fn payload_hash<T: Serialize>(payload: &T) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

struct FeedState<T> {
    active: bool,
    last_delivered_hash: Option<String>,
    last_good: T,
}

struct Subscription<T> {
    id: SubscriptionId,
    name: String,
    state: Mutex<FeedState<T>>,
    /// Held for the whole of a delivery, consumer call included.
    delivery: Mutex<()>,
    /// Thread running the consumer, while it runs.
    delivering_on: Mutex<Option<ThreadId>>,
    task: Mutex<Option<JoinHandle<()>>>,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

enum Tick {
    Delivered,
    Unchanged,
    Stopped,
}

impl<T> Subscription<T> {
    fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Hand `payload` to the consumer unless it matches the last delivery.
    ///
    /// The whole delivery runs under the delivery gate, so a stop from
    /// another thread waits for an in-flight delivery and no delivery can
    /// start once it returns. The state lock is released before the
    /// consumer runs, which lets the consumer cancel its own subscription.
    fn deliver<C: FnMut(T)>(&self, payload: T, hash: String, on_data: &mut C) -> Tick
    where
        T: Clone,
    {
        let _gate = lock(&self.delivery);
        {
            let mut state = lock(&self.state);
            if !state.active {
                return Tick::Stopped;
            }
            if state.last_delivered_hash.as_deref() == Some(hash.as_str()) {
                return Tick::Unchanged;
            }
            state.last_delivered_hash = Some(hash);
            state.last_good = payload.clone();
        }
        self.deliveries.fetch_add(1, Ordering::SeqCst);

        *lock(&self.delivering_on) = Some(thread::current().id());
        on_data(payload);
        *lock(&self.delivering_on) = None;
        Tick::Delivered
    }
}

/// Type-erased stop, so the registry can hold subscriptions of any payload.
trait Stoppable: Send + Sync {
    /// Returns `false` if already stopped.
    fn stop(&self) -> bool;
}

impl<T: Send> Stoppable for Subscription<T> {
    fn stop(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.active {
                return false;
            }
            state.active = false;
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        // Wait out a delivery running elsewhere. A consumer cancelling its
        // own subscription already holds the gate.
        let current = thread::current().id();
        if *lock(&self.delivering_on) != Some(current) {
            drop(lock(&self.delivery));
        }
        info!(feed = %self.name, id = %self.id, "Subscription cancelled");
        true
    }
}

type Registry = Mutex<HashMap<SubscriptionId, Arc<dyn Stoppable>>>;

/// Starts subscriptions and keeps track of the live ones.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    registry: Arc<Registry>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `fetch` every `interval` (clamped to at least 1 ms).
    ///
    /// The first fetch happens immediately. `on_data` is called with each
    /// payload whose content differs from the previously delivered one.
    /// Must be called from within a tokio runtime.
    ///
    /// `on_data` may cancel its own subscription; the current call completes
    /// and no further call is made.
    pub fn subscribe<T, F, Fut, C>(
        &self,
        name: &str,
        fetch: F,
        interval: Duration,
        on_data: C,
    ) -> SubscriptionHandle<T>
    where
        T: Serialize + Clone + Default + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        C: FnMut(T) + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let inner = Arc::new(Subscription {
            id: Uuid::new_v4(),
            name: name.to_string(),
            state: Mutex::new(FeedState {
                active: true,
                last_delivered_hash: None,
                last_good: T::default(),
            }),
            delivery: Mutex::new(()),
            delivering_on: Mutex::new(None),
            task: Mutex::new(None),
            deliveries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        let task = tokio::spawn(run(inner.clone(), fetch, interval, on_data));
        *lock(&inner.task) = Some(task);
        lock(&self.registry).insert(inner.id, inner.clone() as Arc<dyn Stoppable>);

        info!(
            feed = %inner.name,
            id = %inner.id,
            interval_ms = interval.as_millis() as u64,
            "Subscription started"
        );

        SubscriptionHandle {
            inner,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of subscriptions that have not been cancelled.
    pub fn active_count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Cancel every live subscription.
    pub fn shutdown(&self) {
        let drained: Vec<_> = lock(&self.registry).drain().map(|(_, sub)| sub).collect();
        let count = drained.len();
        for sub in drained {
            sub.stop();
        }
        info!(count, "Subscription manager shut down");
    }
}

async fn run<T, F, Fut, C>(
    sub: Arc<Subscription<T>>,
    fetch: F,
    interval: Duration,
    mut on_data: C,
) where
    T: Serialize + Clone + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    C: FnMut(T) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !sub.is_active() {
            break;
        }

        let payload = match tokio::time::timeout(interval, fetch()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                sub.failures.fetch_add(1, Ordering::SeqCst);
                warn!(feed = %sub.name, error = %e, "Fetch failed, keeping last good payload");
                continue;
            }
            Err(_) => {
                sub.failures.fetch_add(1, Ordering::SeqCst);
                warn!(
                    feed = %sub.name,
                    timeout_ms = interval.as_millis() as u64,
                    "Fetch timed out, keeping last good payload"
                );
                continue;
            }
        };

        let hash = match payload_hash(&payload) {
            Ok(hash) => hash,
            Err(e) => {
                sub.failures.fetch_add(1, Ordering::SeqCst);
                warn!(feed = %sub.name, error = %e, "Payload could not be serialized");
                continue;
            }
        };

        match sub.deliver(payload, hash, &mut on_data) {
            Tick::Delivered => debug!(feed = %sub.name, "Delivered changed payload"),
            Tick::Unchanged => debug!(feed = %sub.name, "No change"),
            Tick::Stopped => break,
        }
    }
}

/// Handle to one subscription. Clones refer to the same subscription.
///
/// Dropping a handle does not cancel; call [`SubscriptionHandle::cancel`] or
/// [`SubscriptionManager::shutdown`].
pub struct SubscriptionHandle<T> {
    inner: Arc<Subscription<T>>,
    registry: Weak<Registry>,
}

impl<T> Clone for SubscriptionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: Send + 'static> SubscriptionHandle<T> {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stop polling. Once this returns no further callback runs; when called
    /// from inside the callback, that call is the last. Calling it again is
    /// a no-op; returns whether this call did the stopping.
    pub fn cancel(&self) -> bool {
        let stopped = self.inner.stop();
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.inner.id);
        }
        stopped
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Last successfully delivered payload, or `T::default()` before the
    /// first delivery.
    pub fn last_good(&self) -> T
    where
        T: Clone,
    {
        lock(&self.inner.state).last_good.clone()
    }

    /// Callbacks made so far.
    pub fn deliveries(&self) -> u64 {
        self.inner.deliveries.load(Ordering::SeqCst)
    }

    /// Failed ticks, timeouts included.
    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }
}
