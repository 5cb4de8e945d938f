use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use tts_core::{BackendLoader, ModelRegistry, RemoteLoader};
use tts_server::config::ServerConfig;
use tts_server::{metrics, router, video, AppState};
use video_core::VideoDelegate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting Qwen3-TTS server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();
    let catalog = config.load_catalog()?;
    info!("Model catalog has {} variant(s)", catalog.len());

    let remote = RemoteLoader::new(&config.inference_url, config.inference_timeout())?;
    let loader = Arc::new(BackendLoader::new(remote));
    let registry = Arc::new(ModelRegistry::new(catalog, loader));

    // No model, no server
    let preload = config.preload.keys();
    if !preload.is_empty() {
        info!("Preloading {}", preload.join(", "));
        registry
            .preload(&preload)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to preload models: {e}"))?;
    }

    let video = if config.enable_video {
        let artifacts = video::artifact_dir(&config);
        video::check_artifact_dir(&artifacts).map_err(|e| {
            anyhow::anyhow!("Unusable video artifact directory {}: {e}", artifacts.display())
        })?;
        let delegate = VideoDelegate::new(&config.newavata_api_url, config.video_timeout())?;
        if !delegate.check_availability().await {
            warn!("Video routes are mounted but the renderer is not answering yet");
        }
        Some(delegate)
    } else {
        info!("Video generation disabled (set ENABLE_VIDEO=true to enable)");
        None
    };

    info!(
        "Server configuration loaded: port={}, request_timeout={}s, inference={}",
        config.port, config.request_timeout_secs, config.inference_url
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, registry, video);
    let app = router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different TTS_PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
