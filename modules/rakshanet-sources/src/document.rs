use async_trait::async_trait;
use rakshanet_common::Record;
use serde_json::Value;

use crate::error::Result;

/// One document from a store collection, already decoded to plain JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Record,
}

impl Document {
    /// Build from a JSON object. Non-object values yield an empty field map.
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields: match fields {
                Value::Object(map) => map,
                _ => Record::new(),
            },
        }
    }
}

/// Read access to a subscription-capable document store. Only whole-collection
/// reads are needed; a collection that does not exist reads as empty.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>>;

    /// Store name, for logging.
    fn name(&self) -> &str {
        "document-store"
    }
}
