//! Fixed-grid spatial clustering.
//!
//! Each point snaps to the nearest multiple of the grid size on both axes.
//! Points sharing a snapped cell form one cluster. Cells are keyed by their
//! integer indices so equality never depends on float rounding noise.

use std::collections::BTreeMap;

use rakshanet_common::config::MIN_GRID_SIZE;
use rakshanet_common::{Geolocated, RakshaNetError};
use schemars::JsonSchema;
use serde::Serialize;

/// Grid cell size in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct GridSize(f64);

impl GridSize {
    /// Density heatmap grid (roughly 1.1 km at the equator).
    pub const HEAT: GridSize = GridSize(0.01);
    /// Ring-zone grid, finer than the heatmap.
    pub const RINGS: GridSize = GridSize(0.005);

    /// Rejects non-finite sizes and sizes below [`MIN_GRID_SIZE`], which
    /// would saturate the integer cell indices.
    pub fn new(degrees: f64) -> Result<Self, RakshaNetError> {
        if degrees.is_finite() && degrees >= MIN_GRID_SIZE {
            Ok(Self(degrees))
        } else {
            Err(RakshaNetError::Validation(format!(
                "grid size must be at least {MIN_GRID_SIZE} degrees, got {degrees}"
            )))
        }
    }

    pub fn degrees(&self) -> f64 {
        self.0
    }

    /// Integer cell indices. `f64::round` rounds half away from zero.
    fn cell(&self, lat: f64, lng: f64) -> (i64, i64) {
        ((lat / self.0).round() as i64, (lng / self.0).round() as i64)
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::HEAT
    }
}

/// Points that snapped to the same grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cluster<P> {
    pub grid_lat: f64,
    pub grid_lng: f64,
    pub count: usize,
    pub member_points: Vec<P>,
}

/// Group points by grid cell.
///
/// Points without valid coordinates are skipped. Clusters come back ordered
/// by cell (south-west first) and member points keep their input order, so the
/// result is deterministic. Counts always sum to the number of valid input
/// points.
pub fn cluster<P, I>(points: I, grid: GridSize) -> Vec<Cluster<P>>
where
    P: Geolocated,
    I: IntoIterator<Item = P>,
{
    let mut cells: BTreeMap<(i64, i64), Vec<P>> = BTreeMap::new();
    for point in points {
        let Some(coords) = point.coordinates() else {
            continue;
        };
        cells
            .entry(grid.cell(coords.lat, coords.lng))
            .or_default()
            .push(point);
    }

    cells
        .into_iter()
        .map(|((lat_idx, lng_idx), members)| Cluster {
            grid_lat: lat_idx as f64 * grid.0,
            grid_lng: lng_idx as f64 * grid.0,
            count: members.len(),
            member_points: members,
        })
        .collect()
}

/// Largest cluster count, 0 when there are no clusters.
pub fn max_count<P>(clusters: &[Cluster<P>]) -> usize {
    clusters.iter().map(|c| c.count).max().unwrap_or(0)
}
