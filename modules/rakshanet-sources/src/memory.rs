//! In-memory document store for tests (no network required).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::document::{Document, DocumentStore};
use crate::error::{Result, SourceError};

/// Collections keyed by name. Collections marked failing return a 503.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, name: &str, documents: Vec<Document>) -> Self {
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), documents);
        self
    }

    pub fn insert(&self, collection: &str, document: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().unwrap().insert(collection.to_string());
    }

    pub fn heal_collection(&self, collection: &str) {
        self.failing.lock().unwrap().remove(collection);
    }

    /// Number of `list_documents` calls served (for test assertions).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(collection) {
            return Err(SourceError::Api {
                status: 503,
                message: format!("collection {collection} unavailable"),
            });
        }

        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
