//! Source adapters.
//!
//! Two independent upstreams feed the map: a polling-only backend REST API
//! and a document store whose location collections were renamed over time.
//! Both are read into the uniform [`LocationSample`] / [`SosEvent`] shapes.
//!
//! [`LocationSample`]: rakshanet_common::LocationSample
//! [`SosEvent`]: rakshanet_common::SosEvent

pub mod adapters;
pub mod backend;
pub mod document;
pub mod error;
pub mod firestore;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use adapters::{BackendSource, DocumentStoreSource, EventSource, LocationSource};
pub use backend::{BackendClient, EventQuery};
pub use document::{Document, DocumentStore};
pub use error::{Result, SourceError};
pub use firestore::FirestoreStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryDocumentStore;
