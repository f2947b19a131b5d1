//! Subscription behavior under tokio's paused clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use rakshanet_engine::{SubscriptionHandle, SubscriptionManager};

/// Collects every payload handed to `on_data`.
fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |payload| sink.lock().unwrap().push(payload))
}

type Ready<T> = futures::future::Ready<anyhow::Result<T>>;

/// Fetch that walks through `script` one tick at a time, then repeats the
/// last entry. `None` entries fail.
fn scripted(
    script: Vec<Option<&'static str>>,
) -> (Arc<AtomicUsize>, impl Fn() -> Ready<String> + Send + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetch = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let step = script[n.min(script.len() - 1)];
        futures::future::ready(match step {
            Some(payload) => Ok(payload.to_string()),
            None => Err(anyhow!("upstream down")),
        })
    };
    (calls, fetch)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Fetch yielding 0, 1, 2, ... so every tick is a change.
fn counting() -> impl Fn() -> Ready<usize> + Send + 'static {
    let counter = Arc::new(AtomicUsize::new(0));
    move || futures::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst)))
}

type Slot = Arc<Mutex<Option<SubscriptionHandle<usize>>>>;

/// Callback that cancels its own subscription once the handle is in `slot`.
fn self_cancelling(slot: Slot, calls: Arc<AtomicUsize>) -> impl FnMut(usize) + Send + 'static {
    move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let handle = slot.lock().unwrap().clone();
        if let Some(handle) = handle {
            assert!(handle.cancel());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unchanged_payload_is_delivered_once() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();
    let (calls, fetch) = scripted(vec![Some("A")]);

    let handle = manager.subscribe("test", fetch, Duration::from_secs(3), on_data);
    advance(10_000).await;

    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(*seen.lock().unwrap(), vec!["A".to_string()]);
    assert_eq!(handle.deliveries(), 1);
    assert_eq!(handle.last_good(), "A");
}

#[tokio::test(start_paused = true)]
async fn every_change_is_delivered_in_order() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();
    let (_, fetch) = scripted(vec![Some("A"), Some("A"), Some("B"), Some("B"), Some("A")]);

    manager.subscribe("test", fetch, Duration::from_secs(1), on_data);
    advance(4_500).await;

    assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "A"]);
}

#[tokio::test(start_paused = true)]
async fn first_tick_fires_immediately() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();
    let (_, fetch) = scripted(vec![Some("A")]);

    manager.subscribe("test", fetch, Duration::from_secs(60), on_data);
    advance(1).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn always_failing_fetch_never_delivers() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<Vec<u32>>();
    let handle = manager.subscribe(
        "test",
        || async { Err::<Vec<u32>, _>(anyhow!("no route to host")) },
        Duration::from_secs(1),
        on_data,
    );
    advance(5_500).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(handle.deliveries(), 0);
    assert!(handle.failures() >= 5);
    assert_eq!(handle.last_good(), Vec::<u32>::new());
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_last_good_payload() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();
    let (_, fetch) = scripted(vec![Some("A"), None, None, Some("A")]);

    let handle = manager.subscribe("test", fetch, Duration::from_secs(1), on_data);
    advance(3_500).await;

    // Recovery with identical content is not a change.
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(handle.last_good(), "A");
    assert_eq!(handle.failures(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_all_further_callbacks() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<usize>();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();

    let handle = manager.subscribe(
        "test",
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        },
        Duration::from_secs(1),
        on_data,
    );
    advance(2_500).await;
    let delivered = seen.lock().unwrap().len();
    assert!(delivered >= 2);

    assert!(handle.cancel());
    assert!(!handle.is_active());
    assert_eq!(manager.active_count(), 0);

    advance(10_000).await;
    assert_eq!(seen.lock().unwrap().len(), delivered);

    // Idempotent.
    assert!(!handle.cancel());
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out_as_failure() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();

    let handle = manager.subscribe(
        "test",
        || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        },
        Duration::from_secs(1),
        on_data,
    );
    advance(4_500).await;

    assert!(seen.lock().unwrap().is_empty());
    assert!(handle.failures() >= 2);
    assert_eq!(handle.last_good(), String::new());
}

#[tokio::test(start_paused = true)]
async fn ticks_never_overlap() {
    let manager = SubscriptionManager::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let (in_flight2, peak2, calls2) = (in_flight.clone(), peak.clone(), calls.clone());
    manager.subscribe(
        "test",
        move || {
            let (in_flight, peak, calls) = (in_flight2.clone(), peak2.clone(), calls2.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let n = calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(800)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        },
        Duration::from_secs(1),
        |_: usize| {},
    );
    advance(5_500).await;

    assert!(calls.load(Ordering::SeqCst) >= 4);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_independent() {
    let manager = SubscriptionManager::new();
    let (good_seen, good_cb) = recorder::<String>();
    let (bad_seen, bad_cb) = recorder::<String>();
    let (_, good_fetch) = scripted(vec![Some("A"), Some("B")]);
    let (_, bad_fetch) = scripted(vec![None]);

    let good = manager.subscribe("good", good_fetch, Duration::from_secs(1), good_cb);
    let bad = manager.subscribe("bad", bad_fetch, Duration::from_secs(1), bad_cb);
    assert_eq!(manager.active_count(), 2);
    assert_ne!(good.id(), bad.id());

    advance(500).await;
    bad.cancel();
    advance(2_000).await;

    assert_eq!(*good_seen.lock().unwrap(), vec!["A", "B"]);
    assert!(bad_seen.lock().unwrap().is_empty());
    assert!(good.is_active());
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything() {
    let manager = SubscriptionManager::new();
    let (seen, on_data) = recorder::<String>();
    let (_, fetch) = scripted(vec![Some("A"), Some("B"), Some("C"), Some("D")]);

    let handle = manager.subscribe("test", fetch, Duration::from_secs(1), on_data);
    advance(500).await;
    manager.shutdown();
    advance(5_000).await;

    assert_eq!(manager.active_count(), 0);
    assert!(!handle.is_active());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_clamped() {
    let manager = SubscriptionManager::new();
    let (_, fetch) = scripted(vec![Some("A")]);
    let handle = manager.subscribe("test", fetch, Duration::ZERO, |_: String| {});
    advance(10).await;
    assert_eq!(handle.deliveries(), 1);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn callback_can_cancel_its_own_subscription() {
    let manager = SubscriptionManager::new();
    let slot: Slot = Arc::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = manager.subscribe(
        "test",
        counting(),
        Duration::from_secs(1),
        self_cancelling(slot.clone(), calls.clone()),
    );
    *slot.lock().unwrap() = Some(handle.clone());

    advance(5_500).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.deliveries(), 1);
    assert!(!handle.is_active());
    assert_eq!(manager.active_count(), 0);
    assert!(!handle.cancel());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_can_cancel_itself_on_a_worker_thread() {
    let manager = SubscriptionManager::new();
    let slot: Slot = Arc::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = manager.subscribe(
        "test",
        counting(),
        Duration::from_millis(5),
        self_cancelling(slot.clone(), calls.clone()),
    );
    *slot.lock().unwrap() = Some(handle.clone());

    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        while handle.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "self-cancel did not complete");

    let after_cancel = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_from_elsewhere_waits_for_running_callback() {
    let manager = SubscriptionManager::new();
    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let (entered2, finished2, calls2) = (entered.clone(), finished.clone(), calls.clone());
    let handle = manager.subscribe(
        "test",
        counting(),
        Duration::from_millis(5),
        move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            finished2.store(false, Ordering::SeqCst);
            entered2.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            finished2.store(true, Ordering::SeqCst);
        },
    );

    let started = tokio::time::timeout(Duration::from_secs(2), async {
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(started.is_ok());

    let canceller = handle.clone();
    assert!(tokio::task::spawn_blocking(move || canceller.cancel()).await.unwrap());

    assert!(finished.load(Ordering::SeqCst));
    let after_cancel = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
}
