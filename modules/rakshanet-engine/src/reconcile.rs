use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use rakshanet_common::{sort_newest_first, Geolocated, LocationSample, Timestamped};
use rakshanet_sources::LocationSource;
use tracing::{debug, info, warn};

/// Default width of a deduplication bucket.
pub const DEFAULT_BUCKET_SECS: i64 = 60;

/// Identity of a location sample for deduplication: one report per user per
/// time bucket. Samples whose timestamp cannot be parsed share the `None`
/// bucket for their user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub user_id: String,
    pub bucket: Option<i64>,
}

/// Merges location batches from several adapters into one deduplicated,
/// newest-first list.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    bucket_secs: i64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SECS)
    }
}

impl Reconciler {
    pub fn new(bucket_secs: i64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
        }
    }

    pub fn bucket_secs(&self) -> i64 {
        self.bucket_secs
    }

    pub fn key(&self, sample: &LocationSample) -> DedupKey {
        let width_ms = self.bucket_secs * 1000;
        DedupKey {
            user_id: sample.user_id.clone(),
            bucket: sample
                .timestamp()
                .map(|ts| ts.timestamp_millis().div_euclid(width_ms)),
        }
    }

    /// Merge already-fetched batches. Batch order decides which duplicate
    /// survives (first seen wins); the output order does not depend on it.
    pub fn merge<I>(&self, batches: I) -> Vec<LocationSample>
    where
        I: IntoIterator<Item = Vec<LocationSample>>,
    {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut invalid = 0usize;
        let mut duplicates = 0usize;

        for sample in batches.into_iter().flatten() {
            if sample.coordinates().is_none() {
                invalid += 1;
                continue;
            }
            if seen.insert(self.key(&sample)) {
                merged.push(sample);
            } else {
                duplicates += 1;
            }
        }

        if invalid > 0 || duplicates > 0 {
            debug!(invalid, duplicates, kept = merged.len(), "Reconciled location samples");
        }

        sort_newest_first(&mut merged);
        merged
    }

    /// Query every source concurrently and merge the results. A failing
    /// source contributes nothing.
    pub async fn reconcile(&self, sources: &[Arc<dyn LocationSource>]) -> Vec<LocationSample> {
        let batches = join_all(sources.iter().map(|source| async move {
            let samples = source.fetch_locations().await;
            debug!(source = source.name(), count = samples.len(), "Source returned locations");
            samples
        }))
        .await;

        let merged = self.merge(batches);
        info!(
            sources = sources.len(),
            samples = merged.len(),
            "Location reconciliation complete"
        );
        merged
    }

    /// Like [`reconcile`](Self::reconcile), but fails when every source
    /// failed, so a full outage is never reported as an empty map.
    pub async fn try_reconcile(
        &self,
        sources: &[Arc<dyn LocationSource>],
    ) -> anyhow::Result<Vec<LocationSample>> {
        let results = join_all(sources.iter().map(|source| async move {
            (source.name(), source.try_fetch_locations().await)
        }))
        .await;

        let mut batches = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (name, result) in results {
            match result {
                Ok(samples) => {
                    debug!(source = name, count = samples.len(), "Source returned locations");
                    batches.push(samples);
                }
                Err(e) => {
                    warn!(source = name, error = %e, "Location source failed");
                    last_error = Some((name, e));
                }
            }
        }

        if batches.is_empty() {
            if let Some((name, e)) = last_error {
                return Err(anyhow::Error::new(e)
                    .context(format!("every location source failed (last: {name})")));
            }
        }

        let merged = self.merge(batches);
        info!(
            sources = sources.len(),
            samples = merged.len(),
            "Location reconciliation complete"
        );
        Ok(merged)
    }
}
