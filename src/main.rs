use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use scape_core::{
    Catalog, CoreConfig, JsonCatalog, ReconcileMode, UploadService, constants::DEFAULT_DATA_DIR,
    max_allocation_attempts_from_env_value, max_upload_bytes_from_env_value, reconcile,
};

/// Main entry point for the Scape service
///
/// Resolves configuration once, prepares the data directory, sweeps leftovers from a previous
/// run and then serves the REST API until interrupted.
///
/// # Environment Variables
/// - `SCAPE_DATA_DIR`: Data directory (default: "scape_data")
/// - `SCAPE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `SCAPE_MAX_ALLOCATION_ATTEMPTS`: Allocator draw cap (default: 1000)
/// - `SCAPE_MAX_UPLOAD_BYTES`: Upload size cap in bytes (default: 20 MiB)
/// - `API_KEY`: Shared secret required in `x-api-key` when set
///
/// # Returns
/// * `Ok(())` - If the server shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("scape=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::var("SCAPE_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
    let rest_addr = std::env::var("SCAPE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = CoreConfig::new(
        PathBuf::from(data_dir),
        max_allocation_attempts_from_env_value(std::env::var("SCAPE_MAX_ALLOCATION_ATTEMPTS").ok())?,
        max_upload_bytes_from_env_value(std::env::var("SCAPE_MAX_UPLOAD_BYTES").ok())?,
    )?;
    cfg.ensure_layout()?;
    let cfg = Arc::new(cfg);

    let catalog = Arc::new(JsonCatalog::open(cfg.catalog_path())?);
    tracing::info!(
        "++ Opened catalog {} ({} uploads)",
        catalog.path().display(),
        catalog.all()?.len()
    );

    // Nothing is in flight yet, so leftovers can be cleared. Orphans are only reported.
    let report = reconcile(
        &cfg,
        catalog.as_ref(),
        ReconcileMode::Repair {
            purge_orphans: false,
        },
    )?;
    if !report.orphan_files.is_empty() {
        tracing::warn!(
            "{} canonical file(s) have no catalog record; run `scape reconcile` to inspect",
            report.orphan_files.len()
        );
    }

    let service = UploadService::new(cfg, catalog)?;
    let app = router(AppState::new(service, std::env::var("API_KEY").ok()));

    tracing::info!("++ Starting Scape REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("-- Shutting down Scape REST");
}
