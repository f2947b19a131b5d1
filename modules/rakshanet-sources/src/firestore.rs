use async_trait::async_trait;
use rakshanet_common::Record;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::document::{Document, DocumentStore};
use crate::error::{Result, SourceError};

const BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Hard stop for runaway pagination.
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Firestore over its REST API.
///
/// Lists go through `GET {base}/projects/{project}/databases/(default)/documents/{collection}`
/// and follow `nextPageToken`. Typed values (`{"stringValue": ..}` etc.) are
/// decoded to plain JSON so the shared record normalization applies.
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    api_key: Option<String>,
    page_size: u32,
}

impl FirestoreStore {
    pub fn new(
        client: reqwest::Client,
        project_id: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            project_id: project_id.into(),
            api_key,
            page_size: 300,
        }
    }

    /// Point at an emulator or a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn list_page(&self, collection: &str, page_token: Option<&str>) -> Result<ListResponse> {
        let url = format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url, self.project_id, collection
        );

        let mut params = vec![("pageSize", self.page_size.to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        let resp = self.client.get(&url).query(&params).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.list_page(collection, page_token.as_deref()).await?;
            documents.extend(page.documents.into_iter().map(|doc| Document {
                id: document_id(&doc.name).to_string(),
                fields: decode_fields(&doc.fields),
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(documents),
            }
        }

        tracing::info!(
            collection,
            pages = MAX_PAGES,
            "Firestore: hit page limit, stopping pagination"
        );
        Ok(documents)
    }

    fn name(&self) -> &str {
        "firestore"
    }
}

/// Last path segment of a resource name: `projects/p/.../documents/coll/ID` → `ID`.
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

pub(crate) fn decode_fields(fields: &Map<String, Value>) -> Record {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

/// Decode one Firestore typed value into plain JSON.
pub(crate) fn decode_value(value: &Value) -> Value {
    let Some(typed) = value.as_object() else {
        return value.clone();
    };
    let Some((kind, inner)) = typed.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "doubleValue" => inner.clone(),
        // int64 travels as a decimal string
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| inner.clone()),
            other => other.clone(),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => {
            let lat = inner.get("latitude").and_then(Value::as_f64).unwrap_or(0.0);
            let lng = inner.get("longitude").and_then(Value::as_f64).unwrap_or(0.0);
            serde_json::json!({ "latitude": lat, "longitude": lng })
        }
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => value.clone(),
    }
}
