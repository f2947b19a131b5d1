//! Event reconciliation and spatial clustering.
//!
//! Source adapters → [`Reconciler`] → [`SubscriptionManager`] (change-gated
//! delivery) → [`filter_by_window`] → [`cluster`] → the visualization layer.
//! Everything except the subscription loop is synchronous and pure.

pub mod cluster;
pub mod feed;
pub mod heat;
pub mod reconcile;
pub mod stats;
pub mod window;

pub use cluster::{cluster, Cluster, GridSize};
pub use feed::{SubscriptionHandle, SubscriptionId, SubscriptionManager};
pub use heat::{heat_cells, intensity, ring_zones, HeatCell, IntensityBand, RingZone};
pub use reconcile::{DedupKey, Reconciler};
pub use stats::{summarize, type_counts, EventPriority, TypeFilter};
pub use window::{filter_by_window, TimeWindow};
