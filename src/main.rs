//! Vision Lab Service
//!
//! Object detection with 3D positions, depth heatmaps, face recognition,
//! emotion and age estimation over a REST API, backed by OpenVINO.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use visionlab::api::rest::{create_rest_router, AppState};
use visionlab::config::Config;
use visionlab::engine::ModelPool;
use visionlab::gallery::MemoryGallery;
use visionlab::service::VisionService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting Vision Lab Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = Config::default_path();
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        info!("Using default config ({}: {})", config_path, e);
        Config::default()
    });

    info!("Configuration loaded:");
    info!("  Listen: {}:{}", config.server.host, config.server.port);
    info!("  Device: {}", config.inference.device);
    info!("  Model idle timeout: {}s", config.inference.model_idle_timeout);
    info!("  Known faces: {}", config.recognition.known_faces_dir.display());

    // Initialize model pool
    let pool = Arc::new(ModelPool::new(&config.inference, &config.models));
    if config.inference.preload {
        pool.preload().context("Critical model failed to load")?;
    }

    // Start model cleanup task
    tokio::spawn(pool.clone().start_cleanup_task());

    // Create vision service and load the gallery
    let gallery = Arc::new(MemoryGallery::new());
    let body_limit = config.server.body_limit;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let service = Arc::new(VisionService::new(pool.clone(), gallery, config));
    service.load_known_faces().await?;

    let router = create_rest_router(Arc::new(AppState { service }), body_limit);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("REST API listening on http://{}", addr);
    info!("Vision Lab Service is ready!");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    // Shutdown model pool
    pool.shutdown();

    info!("Goodbye!");
    Ok(())
}
