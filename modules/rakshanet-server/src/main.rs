use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rakshanet_common::config::load_config;
use rakshanet_common::AppConfig;
use rakshanet_engine::{GridSize, Reconciler};
use rakshanet_server::live::{LiveFeeds, Upstreams};
use rakshanet_server::routes::{self, AppState};
use rakshanet_sources::{
    BackendClient, BackendSource, DocumentStoreSource, EventSource, FirestoreStore, LocationSource,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rakshanet-server", about = "RakshaNet live SOS dashboard server")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/rakshanet.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting rakshanet-server");

    let cli = Cli::parse();
    let config_path = cli.config.canonicalize().with_context(|| {
        format!(
            "Config file not found: {}. Create one or specify --config <path>",
            cli.config.display()
        )
    })?;
    tracing::info!(config = %config_path.display(), "Loading config");

    let file_config = load_config(&config_path)?;
    let config = AppConfig::from_env()?;

    let heat_grid = GridSize::new(file_config.clustering.heat_grid_size)?;
    let ring_grid = GridSize::new(file_config.clustering.ring_grid_size)?;
    let reconciler = Reconciler::new(file_config.clustering.dedup_bucket_secs);

    // Backend REST API
    let backend = Arc::new(
        BackendClient::new(
            &file_config.backend.base_url,
            Duration::from_millis(file_config.backend.timeout_ms),
        )?
        .with_token(config.backend_api_token.clone()),
    );
    let backend_source = Arc::new(BackendSource::new(backend.clone()));

    let mut location_sources: Vec<Arc<dyn LocationSource>> = vec![backend_source];
    let mut event_sources: Vec<Arc<dyn EventSource>> = Vec::new();

    // Document store, optional
    if let Some(store_config) = &file_config.document_store {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(file_config.backend.timeout_ms))
            .build()?;
        let store = FirestoreStore::new(
            http_client,
            store_config.project_id.clone(),
            config.firestore_api_key.clone(),
        )
        .with_page_size(store_config.page_size);

        let source = Arc::new(
            DocumentStoreSource::new(Arc::new(store))
                .with_location_collections(store_config.location_collections.clone())
                .with_event_collections(store_config.event_collections.clone()),
        );
        location_sources.push(source.clone());
        event_sources.push(source);
        tracing::info!(project = %store_config.project_id, "Document store enabled");
    }

    let upstreams = Upstreams {
        backend,
        event_sources,
        location_sources,
        reconciler,
    };
    let feeds = Arc::new(LiveFeeds::start(upstreams, &file_config.feeds));

    let app = routes::build_router(
        AppState {
            feeds: feeds.clone(),
            heat_grid,
            ring_grid,
        },
        &file_config.server.allowed_origins,
    );

    let port = config.port_override.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", file_config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feeds.shutdown();
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
