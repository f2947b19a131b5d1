use std::time::Duration;

use rakshanet_common::{DashboardStats, LocationSample, Record, SosEvent};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SourceError};

/// Source name stamped on samples that come from the backend API.
pub const BACKEND_SOURCE: &str = "backend";

/// Filters for `GET /admin/sos-events`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub limit: Option<u32>,
    pub user_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl EventQuery {
    /// The newest `limit` events.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Every event the backend holds.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn between(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(user_id) = &self.user_id {
            params.push(("userId", user_id.clone()));
        }
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            params.push(("start", start.clone()));
            params.push(("end", end.clone()));
        }
        params
    }
}

#[derive(Debug, Deserialize)]
struct ActiveUsersResponse {
    #[serde(rename = "userIds", default)]
    user_ids: Vec<Value>,
}

/// Client for the polled admin backend. Every non-2xx response is an error;
/// callers decide whether that degrades to empty or to last-known-good data.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| SourceError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// `GET /admin/sos-events`. Rows without coordinates are kept; the map
    /// layer skips them later.
    pub async fn sos_events(&self, query: &EventQuery) -> Result<Vec<SosEvent>> {
        let rows: Vec<Value> = self
            .get_json(&["admin", "sos-events"], &query.params())
            .await?;

        let events: Vec<SosEvent> = objects(&rows)
            .map(|(i, record)| SosEvent::from_record(&format!("backend-event-{i}"), record))
            .collect();
        tracing::debug!(count = events.len(), limit = ?query.limit, "Fetched SOS events");
        Ok(events)
    }

    /// `GET /admin/live-locations`. Rows without usable coordinates are dropped.
    pub async fn live_locations(&self) -> Result<Vec<LocationSample>> {
        let rows: Vec<Value> = self.get_json(&["admin", "live-locations"], &[]).await?;

        let samples: Vec<LocationSample> = objects(&rows)
            .filter_map(|(i, record)| {
                let fallback_id = format!("backend-location-{i}");
                LocationSample::from_record(&fallback_id, record, BACKEND_SOURCE)
            })
            .collect();

        let dropped = rows.len() - samples.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped backend locations without coordinates");
        }
        Ok(samples)
    }

    /// `GET /admin/dashboard-stats`.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.get_json(&["admin", "dashboard-stats"], &[]).await
    }

    /// `GET /admin/users`. User profiles are passed through untyped.
    pub async fn users(&self) -> Result<Vec<Value>> {
        self.get_json(&["admin", "users"], &[]).await
    }

    /// `GET /admin/active-users?hours=H`, unwrapped to the list of ids.
    pub async fn active_users(&self, hours: u32) -> Result<Vec<String>> {
        let resp: ActiveUsersResponse = self
            .get_json(&["admin", "active-users"], &[("hours", hours.to_string())])
            .await?;

        Ok(resp
            .user_ids
            .into_iter()
            .filter_map(|id| match id {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    /// `GET /admin/users/:id`. A 404 is `None`, not an error.
    pub async fn user(&self, user_id: &str) -> Result<Option<Value>> {
        let resp = self.send(&["admin", "users", user_id], &[]).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(resp).await.map(Some)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        params: &[(&str, String)],
    ) -> Result<T> {
        let resp = self.send(segments, params).await?;
        Self::decode(resp).await
    }

    async fn send(
        &self,
        segments: &[&str],
        params: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(segments)?;
        let mut req = self.client.get(url).query(params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
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

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn objects(rows: &[Value]) -> impl Iterator<Item = (usize, &Record)> {
    rows.iter()
        .enumerate()
        .filter_map(|(i, row)| row.as_object().map(|record| (i, record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> BackendClient {
        BackendClient::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn endpoint_appends_under_base_path() {
        let c = client("http://localhost:5500/api");
        let url = c.endpoint(&["admin", "sos-events"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5500/api/admin/sos-events");

        let c = client("http://localhost:5500/api/");
        let url = c.endpoint(&["admin", "users", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5500/api/admin/users/a%20b");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(BackendClient::new("not a url", Duration::from_secs(1)).is_err());
        assert!(BackendClient::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn event_query_params() {
        assert!(EventQuery::all().params().is_empty());

        let params = EventQuery::recent(50)
            .for_user("u-1")
            .between("2024-03-01", "2024-03-02")
            .params();
        assert_eq!(
            params,
            vec![
                ("limit", "50".to_string()),
                ("userId", "u-1".to_string()),
                ("start", "2024-03-01".to_string()),
                ("end", "2024-03-02".to_string()),
            ]
        );
    }
}
