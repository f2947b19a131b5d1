//! Polled feeds backing the HTTP boundary.
//!
//! Four subscriptions run for the lifetime of the server: recent events,
//! all events, dashboard stats and reconciled live locations. Each delivers
//! into a `watch` channel, so handlers always read the latest good payload
//! without touching an upstream.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rakshanet_common::config::FeedsConfig;
use rakshanet_common::{sort_newest_first, DashboardStats, LocationSample, SosEvent};
use rakshanet_engine::{summarize, Reconciler, SubscriptionHandle, SubscriptionManager};
use rakshanet_sources::{BackendClient, EventQuery, EventSource, LocationSource};
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Everything the feeds read from.
#[derive(Clone)]
pub struct Upstreams {
    pub backend: Arc<BackendClient>,
    /// Extra event sources merged with the backend's events.
    pub event_sources: Vec<Arc<dyn EventSource>>,
    /// Reconciled into the live location feed.
    pub location_sources: Vec<Arc<dyn LocationSource>>,
    pub reconciler: Reconciler,
}

impl Upstreams {
    /// Backend events plus every secondary event source, deduplicated by id
    /// (backend wins) and ordered newest first.
    ///
    /// A backend failure fails the whole fetch so the feed keeps its last
    /// good list instead of shrinking to the secondary sources.
    pub async fn events(&self, limit: Option<u32>) -> anyhow::Result<Vec<SosEvent>> {
        let query = match limit {
            Some(limit) => EventQuery::recent(limit),
            None => EventQuery::all(),
        };
        let mut events = self.backend.sos_events(&query).await?;

        let mut seen: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();
        for source in &self.event_sources {
            for event in source.fetch_events(limit).await {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }

        sort_newest_first(&mut events);
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    /// Backend counters, or counters derived from the secondary event
    /// sources when the backend endpoint fails.
    ///
    /// Fails when the backend and every secondary source are down, so the
    /// feed keeps its last good counters instead of dropping to zero.
    pub async fn stats(&self) -> anyhow::Result<DashboardStats> {
        let backend_error = match self.backend.dashboard_stats().await {
            Ok(stats) => return Ok(stats),
            Err(e) => e,
        };
        if self.event_sources.is_empty() {
            return Err(backend_error.into());
        }

        warn!(error = %backend_error, "Backend stats unavailable, deriving from event sources");
        let mut events = Vec::new();
        let mut any_read = false;
        for source in &self.event_sources {
            match source.try_fetch_events(None).await {
                Ok(batch) => {
                    any_read = true;
                    events.extend(batch);
                }
                Err(e) => warn!(source = source.name(), error = %e, "Event source failed"),
            }
        }

        if !any_read {
            return Err(anyhow::Error::new(backend_error)
                .context("backend stats and every event source are unavailable"));
        }
        Ok(summarize(&events, Utc::now()))
    }

    /// Reconciled live locations. Fails when every location source failed.
    pub async fn locations(&self) -> anyhow::Result<Vec<LocationSample>> {
        self.reconciler.try_reconcile(&self.location_sources).await
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FeedStatus {
    pub name: String,
    pub active: bool,
    pub deliveries: u64,
    pub failures: u64,
}

/// One running subscription and the channel it delivers into.
pub struct Feed<T> {
    handle: SubscriptionHandle<T>,
    latest: watch::Receiver<T>,
}

impl<T> Feed<T>
where
    T: Serialize + Clone + Default + Send + Sync + 'static,
{
    fn start<F, Fut>(
        manager: &SubscriptionManager,
        name: &str,
        fetch: F,
        interval: Duration,
    ) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, latest) = watch::channel(T::default());
        let feed = name.to_string();
        let handle = manager.subscribe(name, fetch, interval, move |payload| {
            debug!(feed = %feed, "Feed updated");
            tx.send_replace(payload);
        });
        Self { handle, latest }
    }

    pub fn current(&self) -> T {
        T::clone(&self.latest.borrow())
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            name: self.handle.name().to_string(),
            active: self.handle.is_active(),
            deliveries: self.handle.deliveries(),
            failures: self.handle.failures(),
        }
    }
}

pub struct LiveFeeds {
    manager: SubscriptionManager,
    pub recent_events: Feed<Vec<SosEvent>>,
    pub all_events: Feed<Vec<SosEvent>>,
    pub stats: Feed<DashboardStats>,
    pub locations: Feed<Vec<LocationSample>>,
}

impl LiveFeeds {
    /// Start every feed. Must be called inside a tokio runtime.
    pub fn start(upstreams: Upstreams, config: &FeedsConfig) -> Self {
        let manager = SubscriptionManager::new();
        let limit = config.recent_events_limit;

        let up = upstreams.clone();
        let recent_events = Feed::start(
            &manager,
            "recent_events",
            move || {
                let up = up.clone();
                async move { up.events(Some(limit)).await }
            },
            Duration::from_millis(config.recent_events_interval_ms),
        );

        let up = upstreams.clone();
        let all_events = Feed::start(
            &manager,
            "all_events",
            move || {
                let up = up.clone();
                async move { up.events(None).await }
            },
            Duration::from_millis(config.all_events_interval_ms),
        );

        let up = upstreams.clone();
        let stats = Feed::start(
            &manager,
            "stats",
            move || {
                let up = up.clone();
                async move { up.stats().await }
            },
            Duration::from_millis(config.stats_interval_ms),
        );

        let up = upstreams;
        let locations = Feed::start(
            &manager,
            "locations",
            move || {
                let up = up.clone();
                async move { up.locations().await }
            },
            Duration::from_millis(config.locations_interval_ms),
        );

        Self {
            manager,
            recent_events,
            all_events,
            stats,
            locations,
        }
    }

    pub fn statuses(&self) -> Vec<FeedStatus> {
        vec![
            self.recent_events.status(),
            self.all_events.status(),
            self.stats.status(),
            self.locations.status(),
        ]
    }

    /// Cancel every feed.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
