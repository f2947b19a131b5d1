use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rakshanet_common::{
    DashboardStats, LocationSample, MapPoint, RakshaNetError, SosEvent, SosType,
};
use rakshanet_engine::{
    cluster, filter_by_window, heat_cells, ring_zones, type_counts, EventPriority, GridSize,
    HeatCell, RingZone, TimeWindow, TypeFilter,
};
use rakshanet_engine::heat::{DEFAULT_RING_OPACITY, DEFAULT_RING_RADIUS};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::live::{FeedStatus, LiveFeeds};

#[derive(Clone)]
pub struct AppState {
    pub feeds: Arc<LiveFeeds>,
    pub heat_grid: GridSize,
    pub ring_grid: GridSize,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/events", get(events))
        .route("/api/stats", get(stats))
        .route("/api/locations", get(locations))
        .route("/api/heatmap", get(heatmap))
        .route("/api/heatmap/rings", get(heatmap_rings))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(RakshaNetError);

impl From<RakshaNetError> for ApiError {
    fn from(e: RakshaNetError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RakshaNetError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    window: Option<String>,
    #[serde(rename = "type")]
    sos_type: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeatmapParams {
    window: Option<String>,
    layers: Option<String>,
}

fn parse_window(raw: Option<&str>) -> Result<TimeWindow, RakshaNetError> {
    raw.map_or(Ok(TimeWindow::All), str::parse)
}

/// Which point kinds feed the density map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layers {
    sos: bool,
    locations: bool,
}

impl Layers {
    fn parse(raw: Option<&str>) -> Result<Self, RakshaNetError> {
        let Some(raw) = raw else {
            return Ok(Self { sos: true, locations: true });
        };
        let mut layers = Self { sos: false, locations: false };
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "sos" => layers.sos = true,
                "locations" => layers.locations = true,
                other => {
                    return Err(RakshaNetError::Validation(format!("unknown layer '{other}'")));
                }
            }
        }
        Ok(layers)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, JsonSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub feeds: Vec<FeedStatus>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriagedEvent {
    #[serde(flatten)]
    pub event: SosEvent,
    pub priority: EventPriority,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub window: TimeWindow,
    pub count: usize,
    pub type_counts: BTreeMap<SosType, usize>,
    pub events: Vec<TriagedEvent>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapResponse {
    pub window: TimeWindow,
    pub grid_size: GridSize,
    pub total_points: usize,
    pub cells: Vec<HeatCell>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RingsResponse {
    pub window: TimeWindow,
    pub grid_size: GridSize,
    pub zones: Vec<RingZone>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        feeds: state.feeds.statuses(),
    })
}

/// The unbounded feed for `all`, otherwise the recent feed narrowed to the
/// window.
fn events_for_window(feeds: &LiveFeeds, window: TimeWindow) -> Vec<SosEvent> {
    if window == TimeWindow::All {
        feeds.all_events.current()
    } else {
        filter_by_window(feeds.recent_events.current(), window, Utc::now())
    }
}

async fn events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>, ApiError> {
    let window = parse_window(params.window.as_deref())?;
    let filter: TypeFilter = params.sos_type.as_deref().unwrap_or("all").parse()?;

    let events = match params.scope.as_deref().unwrap_or("recent") {
        "recent" => filter_by_window(state.feeds.recent_events.current(), window, Utc::now()),
        "all" => events_for_window(&state.feeds, window),
        other => {
            return Err(RakshaNetError::Validation(format!(
                "unknown scope '{other}' (expected recent or all)"
            ))
            .into())
        }
    };

    let type_counts = type_counts(&events);
    let now = Utc::now();
    let events: Vec<TriagedEvent> = filter
        .apply(events)
        .into_iter()
        .map(|event| TriagedEvent {
            priority: EventPriority::of(&event, now),
            event,
        })
        .collect();

    Ok(Json(EventsResponse {
        window,
        count: events.len(),
        type_counts,
        events,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(state.feeds.stats.current())
}

async fn locations(State(state): State<AppState>) -> Json<Vec<LocationSample>> {
    Json(state.feeds.locations.current())
}

fn map_points(feeds: &LiveFeeds, window: TimeWindow, layers: Layers) -> Vec<MapPoint> {
    let mut points = Vec::new();
    if layers.sos {
        points.extend(events_for_window(feeds, window).into_iter().map(MapPoint::from));
    }
    if layers.locations {
        points.extend(feeds.locations.current().into_iter().map(MapPoint::from));
    }
    points
}

async fn heatmap(
    State(state): State<AppState>,
    Query(params): Query<HeatmapParams>,
) -> Result<Json<HeatmapResponse>, ApiError> {
    let window = parse_window(params.window.as_deref())?;
    let layers = Layers::parse(params.layers.as_deref())?;

    let clusters = cluster(map_points(&state.feeds, window, layers), state.heat_grid);
    Ok(Json(HeatmapResponse {
        window,
        grid_size: state.heat_grid,
        total_points: clusters.iter().map(|c| c.count).sum(),
        cells: heat_cells(&clusters),
    }))
}

async fn heatmap_rings(
    State(state): State<AppState>,
    Query(params): Query<HeatmapParams>,
) -> Result<Json<RingsResponse>, ApiError> {
    let window = parse_window(params.window.as_deref())?;
    let layers = Layers::parse(params.layers.as_deref())?;

    let clusters = cluster(map_points(&state.feeds, window, layers), state.ring_grid);
    Ok(Json(RingsResponse {
        window,
        grid_size: state.ring_grid,
        zones: ring_zones(&clusters, DEFAULT_RING_RADIUS, DEFAULT_RING_OPACITY),
    }))
}
