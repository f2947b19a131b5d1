//! Uniform read interfaces over every upstream.
//!
//! The `try_*` methods report an upstream outage as an error. The plain
//! `fetch_*` methods never fail past this boundary: an outage is logged and
//! read as "no data currently available from this source".

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rakshanet_common::{sort_newest_first, LocationSample, SosEvent};
use tracing::{debug, warn};

use crate::backend::{BackendClient, EventQuery};
use crate::document::{Document, DocumentStore};
use crate::error::{Result, SourceError};

#[async_trait]
pub trait LocationSource: Send + Sync {
    fn name(&self) -> &str;

    /// Errors only when nothing at all could be read.
    async fn try_fetch_locations(&self) -> Result<Vec<LocationSample>>;

    async fn fetch_locations(&self) -> Vec<LocationSample> {
        match self.try_fetch_locations().await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(source = self.name(), error = %e, "Location fetch failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Errors only when nothing at all could be read.
    async fn try_fetch_events(&self, limit: Option<u32>) -> Result<Vec<SosEvent>>;

    async fn fetch_events(&self, limit: Option<u32>) -> Vec<SosEvent> {
        match self.try_fetch_events(limit).await {
            Ok(events) => events,
            Err(e) => {
                warn!(source = self.name(), error = %e, "SOS event fetch failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backend API
// ---------------------------------------------------------------------------

pub struct BackendSource {
    client: Arc<BackendClient>,
}

impl BackendSource {
    pub fn new(client: Arc<BackendClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LocationSource for BackendSource {
    fn name(&self) -> &str {
        "backend"
    }

    async fn try_fetch_locations(&self) -> Result<Vec<LocationSample>> {
        self.client.live_locations().await
    }
}

#[async_trait]
impl EventSource for BackendSource {
    fn name(&self) -> &str {
        "backend"
    }

    async fn try_fetch_events(&self, limit: Option<u32>) -> Result<Vec<SosEvent>> {
        let query = EventQuery {
            limit,
            ..EventQuery::default()
        };
        self.client.sos_events(&query).await
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// Reads location and event documents from a document store.
///
/// Location documents are spread over several historically-named
/// collections; every one is searched and each sample is tagged with the
/// collection it came from. A failing collection is skipped as long as at
/// least one other collection could be read.
pub struct DocumentStoreSource {
    store: Arc<dyn DocumentStore>,
    location_collections: Vec<String>,
    event_collections: Vec<String>,
}

impl DocumentStoreSource {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            location_collections: vec![
                "liveLocations".to_string(),
                "locations".to_string(),
                "userLocations".to_string(),
                "trackingData".to_string(),
            ],
            event_collections: vec!["sosEvents".to_string(), "emergencyEvents".to_string()],
        }
    }

    pub fn with_location_collections(mut self, collections: Vec<String>) -> Self {
        self.location_collections = collections;
        self
    }

    pub fn with_event_collections(mut self, collections: Vec<String>) -> Self {
        self.event_collections = collections;
        self
    }

    /// Read every collection concurrently. Fails with the last error when
    /// every read failed.
    async fn read_collections<'a>(
        &self,
        collections: &'a [String],
    ) -> Result<Vec<(&'a str, Vec<Document>)>> {
        let reads = collections.iter().map(|collection| async move {
            (collection.as_str(), self.store.list_documents(collection).await)
        });

        let mut read = Vec::new();
        let mut last_error: Option<SourceError> = None;
        for (collection, result) in join_all(reads).await {
            match result {
                Ok(documents) => read.push((collection, documents)),
                Err(e) => {
                    warn!(
                        source = self.store.name(),
                        collection,
                        error = %e,
                        "Collection read failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if read.is_empty() => Err(e),
            _ => Ok(read),
        }
    }
}

#[async_trait]
impl LocationSource for DocumentStoreSource {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn try_fetch_locations(&self) -> Result<Vec<LocationSample>> {
        let mut samples = Vec::new();
        for (collection, documents) in self.read_collections(&self.location_collections).await? {
            let before = samples.len();
            samples.extend(documents.iter().filter_map(|doc| {
                LocationSample::from_record(&doc.id, &doc.fields, collection)
            }));

            let kept = samples.len() - before;
            if kept < documents.len() {
                debug!(
                    collection,
                    dropped = documents.len() - kept,
                    "Dropped location documents without coordinates"
                );
            }
        }

        debug!(
            source = self.store.name(),
            count = samples.len(),
            "Fetched document-store locations"
        );
        Ok(samples)
    }
}

#[async_trait]
impl EventSource for DocumentStoreSource {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn try_fetch_events(&self, limit: Option<u32>) -> Result<Vec<SosEvent>> {
        let mut events: Vec<SosEvent> = self
            .read_collections(&self.event_collections)
            .await?
            .into_iter()
            .flat_map(|(_, documents)| documents)
            .map(|doc| SosEvent::from_record(&doc.id, &doc.fields))
            .collect();

        sort_newest_first(&mut events);
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }
}
