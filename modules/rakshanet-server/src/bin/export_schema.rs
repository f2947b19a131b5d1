//! Export JSON Schemas for the HTTP payloads.
//!
//! Usage: cargo run --bin export-schema [output_path]

use rakshanet_common::{DashboardStats, LocationSample};
use rakshanet_server::routes::{EventsResponse, HealthResponse, HeatmapResponse, RingsResponse};
use schemars::schema_for;

fn main() -> anyhow::Result<()> {
    let schemas = serde_json::json!({
        "health": schema_for!(HealthResponse),
        "events": schema_for!(EventsResponse),
        "stats": schema_for!(DashboardStats),
        "locations": schema_for!(Vec<LocationSample>),
        "heatmap": schema_for!(HeatmapResponse),
        "rings": schema_for!(RingsResponse),
    });
    let rendered = serde_json::to_string_pretty(&schemas)?;

    match std::env::args().nth(1) {
        Some(out_path) => {
            std::fs::write(&out_path, &rendered)?;
            eprintln!("Schemas exported to {out_path} ({} bytes)", rendered.len());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
