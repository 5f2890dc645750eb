use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use doc_jobs::app_state::AppState;
use doc_jobs::config::{AppConfig, JobSettings};
use doc_jobs::routes;
use doc_jobs::services::{
    identity::{IdentityVerifier, JwtVerifier},
    memory::{MemoryBlobStore, MemoryJobQueue, MemoryStateStore},
    queue::{JobQueue, RedisJobQueue},
    state_store::{self, RedisStateStore, StateStore},
    storage::{BlobStore, S3BlobStore},
};

const BYTES_PER_MB: usize = 1024 * 1024;

type Backends = (Arc<dyn StateStore>, Arc<dyn JobQueue>, Arc<dyn BlobStore>);

async fn redis_backends(config: &AppConfig) -> Backends {
    tracing::info!("Connecting to Redis state store and queue");
    let conn = state_store::connect_redis(&config.redis_url, config.store_timeout())
        .await
        .expect("Failed to connect to Redis");

    tracing::info!("Initializing S3 blob store");
    let require = |value: &Option<String>, name: &str| -> String {
        value
            .clone()
            .unwrap_or_else(|| panic!("{name} must be set when STATE_BACKEND=redis"))
    };
    let blobs = S3BlobStore::new(
        &require(&config.s3_bucket, "S3_BUCKET"),
        &require(&config.s3_endpoint, "S3_ENDPOINT"),
        &config.s3_region,
        &require(&config.s3_access_key, "S3_ACCESS_KEY"),
        &require(&config.s3_secret_key, "S3_SECRET_KEY"),
        config.store_timeout(),
    )
    .expect("Failed to initialize S3 blob store");

    (
        Arc::new(RedisStateStore::new(conn.clone(), config.store_timeout())),
        Arc::new(RedisJobQueue::new(conn, config.store_timeout())),
        Arc::new(blobs),
    )
}

fn memory_backends() -> Backends {
    tracing::warn!("Using in-process state backend; jobs are lost on restart");
    (
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemoryJobQueue::new()),
        Arc::new(MemoryBlobStore::default()),
    )
}

/// Largest accepted upload plus headroom for the multipart envelope.
fn body_limit(settings: &JobSettings) -> usize {
    let largest_mb = settings
        .intake
        .max_ocr_file_size_mb
        .max(settings.intake.max_transcription_file_size_mb);
    usize::try_from(largest_mb)
        .unwrap_or(usize::MAX)
        .saturating_add(1)
        .saturating_mul(BYTES_PER_MB)
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config.job_settings();

    tracing::info!(
        backend = %config.state_backend,
        partitioning = settings.queues.partitioning_enabled,
        "Initializing doc-jobs server"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_job_metrics();

    let (store, queue, blobs) = match config.state_backend.trim().to_lowercase().as_str() {
        "memory" => memory_backends(),
        "redis" => redis_backends(&config).await,
        other => panic!("Unsupported STATE_BACKEND {other:?}; expected redis or memory"),
    };

    let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(
        &config.jwt_secret,
        config.jwt_audience.as_deref(),
    ));

    let limit = body_limit(&settings);
    let state = AppState::new(store, queue, blobs, verifier, settings);

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
