//! Backend client and adapter behavior against a local stand-in API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rakshanet_common::SosType;
use rakshanet_sources::{
    BackendClient, BackendSource, EventQuery, EventSource, LocationSource, SourceError,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Stand-in backend
// ---------------------------------------------------------------------------

async fn sos_events(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(usize::MAX);
    let events = vec![
        json!({
            "id": 1,
            "type": "voice",
            "latitude": 13.08,
            "longitude": 80.27,
            "timestamp": "2024-03-01T10:00:00Z"
        }),
        json!({
            "id": 2,
            "type": "SMS",
            "lat": 12.97,
            "lng": 77.59,
            "timestamp": "2024-03-01T09:00:00Z"
        }),
        json!({"id": 3, "type": "button", "timestamp": "2024-03-01T08:00:00Z"}),
    ];
    Json(Value::Array(events.into_iter().take(limit).collect()))
}

async fn live_locations() -> Json<Value> {
    Json(json!([
        {
            "id": "a",
            "userId": "u-1",
            "lat": 13.08,
            "lng": 80.27,
            "timestamp": "2024-03-01T10:00:00Z"
        },
        {"id": "b", "userId": "u-2", "timestamp": "2024-03-01T10:00:00Z"},
        "garbage"
    ]))
}

async fn dashboard_stats() -> Json<Value> {
    Json(json!({"todaySOSCount": 2, "weekSOSCount": 5, "monthSOSCount": 9, "activeUsersCount": 3}))
}

async fn active_users(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(params.get("hours").map(String::as_str), Some("12"));
    Json(json!({"userIds": ["u-1", 7, null]}))
}

async fn user(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if id == "u-1" {
        Ok(Json(json!({"id": "u-1", "name": "Asha"})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn spawn_backend(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn healthy_backend() -> BackendClient {
    let router = Router::new()
        .route("/api/admin/sos-events", get(sos_events))
        .route("/api/admin/live-locations", get(live_locations))
        .route("/api/admin/dashboard-stats", get(dashboard_stats))
        .route("/api/admin/active-users", get(active_users))
        .route("/api/admin/users/{id}", get(user));
    let addr = spawn_backend(router).await;
    BackendClient::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap()
}

async fn broken_backend() -> BackendClient {
    let router = Router::new().fallback(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") });
    let addr = spawn_backend(router).await;
    BackendClient::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sos_events_normalize_both_coordinate_conventions() {
    let client = healthy_backend().await;
    let events = client.sos_events(&EventQuery::all()).await.unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].id, "1");
    assert_eq!(events[0].lat, Some(13.08));
    assert_eq!(events[1].sos_type, SosType::Sms);
    assert_eq!(events[1].lng, Some(77.59));
    assert_eq!(events[2].lat, None);
}

#[tokio::test]
async fn sos_events_forward_limit() {
    let client = healthy_backend().await;
    let events = client.sos_events(&EventQuery::recent(2)).await.unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn live_locations_drop_records_without_coordinates() {
    let client = healthy_backend().await;
    let samples = client.live_locations().await.unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].user_id, "u-1");
    assert_eq!(samples[0].source_name, "backend");
}

#[tokio::test]
async fn dashboard_stats_and_active_users() {
    let client = healthy_backend().await;

    let stats = client.dashboard_stats().await.unwrap();
    assert_eq!(stats.week_count, 5);
    assert_eq!(stats.active_users_count, 3);

    let users = client.active_users(12).await.unwrap();
    assert_eq!(users, vec!["u-1".to_string(), "7".to_string()]);
}

#[tokio::test]
async fn missing_user_is_none() {
    let client = healthy_backend().await;
    assert!(client.user("u-1").await.unwrap().is_some());
    assert!(client.user("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn non_success_status_is_an_api_error() {
    let client = broken_backend().await;
    match client.dashboard_stats().await {
        Err(SourceError::Api { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = BackendClient::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        client.live_locations().await,
        Err(SourceError::Network(_)) | Err(SourceError::Timeout(_))
    ));
}

// ---------------------------------------------------------------------------
// Adapter boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adapter_degrades_failures_to_empty() {
    let source = BackendSource::new(Arc::new(broken_backend().await));

    assert!(source.fetch_locations().await.is_empty());
    assert!(source.fetch_events(Some(10)).await.is_empty());
}

#[tokio::test]
async fn adapter_passes_through_healthy_data() {
    let source = BackendSource::new(Arc::new(healthy_backend().await));

    assert_eq!(source.fetch_locations().await.len(), 1);
    assert_eq!(source.fetch_events(Some(1)).await.len(), 1);
    assert_eq!(LocationSource::name(&source), "backend");
}
