//! Intensity normalization and map styling for clusters.

use schemars::JsonSchema;
use serde::Serialize;

use crate::cluster::{max_count, Cluster};

/// Rings drawn per cluster in the zone view.
pub const RING_COUNT: usize = 3;
/// Base ring radius in pixels.
pub const DEFAULT_RING_RADIUS: f64 = 60.0;
pub const DEFAULT_RING_OPACITY: f64 = 0.8;

/// `count / max_count`, in `(0, 1]` for any non-empty pass. The largest
/// cluster of a pass is always 1.0.
pub fn intensity(count: usize, max_count: usize) -> f64 {
    if max_count == 0 {
        return 0.0;
    }
    count as f64 / max_count as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntensityBand {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl IntensityBand {
    pub fn classify(intensity: f64) -> Self {
        if intensity > 0.8 {
            IntensityBand::Highest
        } else if intensity > 0.6 {
            IntensityBand::High
        } else if intensity > 0.4 {
            IntensityBand::Medium
        } else if intensity > 0.2 {
            IntensityBand::Low
        } else {
            IntensityBand::Lowest
        }
    }

    /// Marker fill, darkest red for the densest cells.
    pub fn marker_color(&self) -> &'static str {
        match self {
            IntensityBand::Highest => "#8B0000",
            IntensityBand::High => "#DC2626",
            IntensityBand::Medium => "#EF4444",
            IntensityBand::Low => "#F87171",
            IntensityBand::Lowest => "#FCA5A5",
        }
    }

    /// Orange-to-red ramp used by the ring view, as `(r, g, b)`.
    pub fn ring_rgb(&self) -> (u8, u8, u8) {
        match self {
            IntensityBand::Highest => (255, 0, 0),
            IntensityBand::High => (255, 69, 0),
            IntensityBand::Medium => (255, 140, 0),
            IntensityBand::Low => (255, 165, 0),
            IntensityBand::Lowest => (255, 215, 0),
        }
    }
}

/// Marker radius in meters on the map layer.
pub fn marker_radius(intensity: f64) -> f64 {
    (intensity * 200.0).max(50.0)
}

/// Overlay bubble diameter in pixels.
pub fn overlay_radius(intensity: f64) -> f64 {
    (intensity * 60.0).max(20.0)
}

fn ring_color(intensity: f64, opacity: f64) -> String {
    let (r, g, b) = IntensityBand::classify(intensity).ring_rgb();
    format!("rgba({r}, {g}, {b}, {})", intensity * opacity)
}

/// One styled heatmap cell.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeatCell {
    pub lat: f64,
    pub lng: f64,
    pub count: usize,
    pub intensity: f64,
    pub band: IntensityBand,
    pub color: String,
    pub marker_radius: f64,
    pub overlay_radius: f64,
}

pub fn heat_cells<P>(clusters: &[Cluster<P>]) -> Vec<HeatCell> {
    let max = max_count(clusters);
    clusters
        .iter()
        .map(|c| {
            let intensity = intensity(c.count, max);
            let band = IntensityBand::classify(intensity);
            HeatCell {
                lat: c.grid_lat,
                lng: c.grid_lng,
                count: c.count,
                intensity,
                band,
                color: band.marker_color().to_string(),
                marker_radius: marker_radius(intensity),
                overlay_radius: overlay_radius(intensity),
            }
        })
        .collect()
}

/// One animated ring around a fine-grid cluster.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RingZone {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub size: f64,
    pub intensity: f64,
    pub delay_secs: f64,
    pub color: String,
}

/// [`RING_COUNT`] concentric rings per cluster. Each outer ring is 30%
/// larger, 20% less intense and starts half a second later than the one
/// inside it.
pub fn ring_zones<P>(clusters: &[Cluster<P>], radius: f64, opacity: f64) -> Vec<RingZone> {
    let max = max_count(clusters);
    let mut zones = Vec::with_capacity(clusters.len() * RING_COUNT);

    for c in clusters {
        let base_intensity = intensity(c.count, max);
        let size = (radius * 0.5).max(radius * base_intensity);

        for ring in 0..RING_COUNT {
            let step = ring as f64;
            let ring_intensity = base_intensity * (1.0 - step * 0.2);
            zones.push(RingZone {
                id: format!("{}-{}-{}", c.grid_lat, c.grid_lng, ring),
                lat: c.grid_lat,
                lng: c.grid_lng,
                size: size * (1.0 + step * 0.3),
                intensity: ring_intensity,
                delay_secs: step * 0.5,
                color: ring_color(ring_intensity, opacity),
            });
        }
    }
    zones
}
