use anyhow::{Context, Result};
use plate_service::{
    api,
    config::PlateServiceConfig,
    extractor::OnnxTextRecognizer,
    localizer::{overlay::load_font, HaarCascade},
    model_store,
    normalizer::ImageNormalizer,
    PlatePipeline, PlateServiceState,
};
use std::sync::Arc;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry (logging and metrics)
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("plate-service").with_version(api::routes::SERVICE_VERSION),
    );

    info!("Starting Plate Service...");

    // Load configuration from environment
    let config = PlateServiceConfig::from_env()?;
    info!(
        "Plate Service configuration: bind={}, node_id={}, cascade={}, ocr_model={}",
        config.bind_addr,
        config.node_id,
        config.cascade_path.display(),
        config.recognizer.model_path
    );

    // Models are required; fail before binding the listener
    let pipeline = load_pipeline(&config)
        .await
        .context("Failed to load recognition models")?;
    let state = PlateServiceState::new(config.node_id.clone(), pipeline);

    // Build HTTP router
    let app = api::router(state.clone());

    // Bind and serve
    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Plate Service listening on {}", config.bind_addr);

    // Run with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn load_pipeline(config: &PlateServiceConfig) -> Result<PlatePipeline> {
    let cascade_path = model_store::ensure_model(&config.cascade_path, &config.cascade_url).await?;
    let cascade = HaarCascade::from_file(&cascade_path)?;

    let recognizer_config = config.recognizer.clone();
    let recognizer =
        tokio::task::spawn_blocking(move || OnnxTextRecognizer::new(recognizer_config))
            .await
            .context("Recognizer loading task failed")??;
    info!(
        "Text recognizer using {} execution provider",
        recognizer.execution_provider()
    );

    let normalizer = ImageNormalizer::new(config.max_file_size, config.max_dimension);
    let mut pipeline = PlatePipeline::new(normalizer, Arc::new(cascade), Arc::new(recognizer));

    if let Some(font_path) = &config.overlay_font_path {
        pipeline = pipeline.with_font(load_font(font_path)?);
        info!("Overlay labels rendered with {}", font_path.display());
    }

    Ok(pipeline)
}

async fn shutdown_signal(state: PlateServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown();
}
