//! Vigil Camserver
//!
//! Main entry point for the camera session server.

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_camserver::detection::HttpDetector;
use vigil_camserver::event_sink::{EventPublisher, EventSink, HttpEventSink, MemoryEventLog};
use vigil_camserver::recorder::encoder::FfmpegEncoderFactory;
use vigil_camserver::session::SessionRegistry;
use vigil_camserver::state::{AppConfig, AppState};
use vigil_camserver::web_api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_camserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Vigil Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        inference_url = %config.inference_url,
        output_root = %config.output_root.display(),
        record_queue_capacity = config.record_queue_capacity,
        pre_roll_secs = config.pre_roll_secs,
        end_delay_secs = config.end_delay.as_secs(),
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.output_root).await?;

    // Initialize components
    let registry = Arc::new(SessionRegistry::new());

    let detector = Arc::new(HttpDetector::new(config.inference_url.clone()));
    if detector.health_check().await {
        tracing::info!("Inference server reachable");
    } else {
        tracing::warn!(
            inference_url = %config.inference_url,
            "Inference server not reachable at startup, detection will retry per cycle"
        );
    }

    let event_log = Arc::new(MemoryEventLog::default());
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![event_log.clone()];
    if let Some(ref event_store_url) = config.event_store_url {
        tracing::info!(event_store_url = %event_store_url, "Event store sink enabled");
        sinks.push(Arc::new(HttpEventSink::new(event_store_url.clone())));
    } else {
        tracing::info!("Event store sink disabled (EVENT_STORE_URL not set)");
    }
    let events = Arc::new(EventPublisher::new(sinks));

    let state = AppState {
        config,
        registry,
        detector,
        events,
        event_log,
        encoder_factory: Arc::new(FfmpegEncoderFactory),
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
