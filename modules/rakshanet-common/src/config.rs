use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Smallest accepted grid cell, in degrees. Finer grids overflow the integer
/// cell index for valid coordinates.
pub const MIN_GRID_SIZE: f64 = 1e-9;

/// Secrets and deployment-specific overrides, loaded from the environment.
/// Tunables live in the TOML [`FileConfig`].
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub firestore_api_key: Option<String>,
    pub backend_api_token: Option<String>,
    pub port_override: Option<u16>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port_override = match std::env::var("RAKSHANET_PORT") {
            Ok(raw) => Some(
                raw.parse()
                    .with_context(|| format!("RAKSHANET_PORT must be a port number, got {raw}"))?,
            ),
            Err(_) => None,
        };

        let config = Self {
            firestore_api_key: non_empty_env("FIRESTORE_API_KEY"),
            backend_api_token: non_empty_env("BACKEND_API_TOKEN"),
            port_override,
        };

        tracing::info!(
            firestore_key = config.firestore_api_key.is_some(),
            backend_token = config.backend_api_token.is_some(),
            "Loaded environment config"
        );
        Ok(config)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// TOML-backed configuration loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub document_store: Option<DocumentStoreConfig>,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentStoreConfig {
    pub project_id: String,
    #[serde(default = "default_location_collections")]
    pub location_collections: Vec<String>,
    #[serde(default = "default_event_collections")]
    pub event_collections: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FeedsConfig {
    pub recent_events_interval_ms: u64,
    pub recent_events_limit: u32,
    pub all_events_interval_ms: u64,
    pub stats_interval_ms: u64,
    pub locations_interval_ms: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            recent_events_interval_ms: 3_000,
            recent_events_limit: 200,
            all_events_interval_ms: 5_000,
            stats_interval_ms: 5_000,
            locations_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClusteringConfig {
    /// Primary density layer cell size in degrees (~1 km).
    pub heat_grid_size: f64,
    /// Finer cell size for the multi-ring fallback layer.
    pub ring_grid_size: f64,
    /// Width of the per-user dedup bucket when merging location sources.
    pub dedup_bucket_secs: i64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            heat_grid_size: 0.01,
            ring_grid_size: 0.005,
            dedup_bucket_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5600,
            allowed_origins: Vec::new(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_location_collections() -> Vec<String> {
    ["liveLocations", "locations", "userLocations", "trackingData"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_event_collections() -> Vec<String> {
    ["sosEvents", "emergencyEvents"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_page_size() -> u32 {
    300
}

impl FileConfig {
    /// Parse from TOML text and check values that serde cannot.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: FileConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        let sizes = [
            ("heat_grid_size", c.heat_grid_size),
            ("ring_grid_size", c.ring_grid_size),
        ];
        for (name, size) in sizes {
            if !(size.is_finite() && size >= MIN_GRID_SIZE) {
                anyhow::bail!(
                    "clustering.{name} must be at least {MIN_GRID_SIZE} degrees, got {size}"
                );
            }
        }
        if c.dedup_bucket_secs <= 0 {
            anyhow::bail!("clustering.dedup_bucket_secs must be positive");
        }
        if self.backend.base_url.trim().is_empty() {
            anyhow::bail!("backend.base_url must not be empty");
        }
        Ok(())
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    FileConfig::from_toml(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}
