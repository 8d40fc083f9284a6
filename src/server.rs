use anyhow::Result;
use axum::{extract::DefaultBodyLimit, middleware, routing::{get, post}, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::{self, IdentityProvider, SqliteIdentityProvider},
    config::{Config, SealPolicy},
    handlers::{self, AppState},
    insights::{spawn_sealer, AggregateStore, LogIngester},
    metrics,
    observability::{self, CleanupConfig, LogRepository, PersistenceWriter},
    search::SearchQueryEngine,
    signals::setup_signal_handlers,
};

/// Start the insights server
///
/// 1. Initializes metrics (when enabled)
/// 2. Connects the database and runs migrations
/// 3. Spawns the persistence writer, cleanup task and, for the interval
///    policy, the sealer
/// 4. Serves requests until SIGINT/SIGTERM
/// 5. Seals open windows (interval policy) and flushes the writer
pub async fn start_server(config: Config) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        Some(Arc::new(metrics::init_metrics()?))
    } else {
        None
    };

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let pool = observability::connect(&config.database).await?;
    let repo = LogRepository::new(pool);
    let writer = PersistenceWriter::spawn(repo.clone(), config.aggregation.writer_queue_warn_depth);
    let cleanup_handle =
        observability::spawn_cleanup_task(repo.clone(), CleanupConfig::from(&config.retention));

    let state = build_state(Arc::new(config.clone()), repo.clone(), Some(writer.clone()));

    let sealer_handle = match config.aggregation.seal_policy {
        SealPolicy::Interval => Some(spawn_sealer(
            state.ingester.clone(),
            Duration::from_secs(config.aggregation.seal_interval_seconds),
            shutdown_tx.subscribe(),
        )),
        SealPolicy::Count => None,
    };

    let identity: Arc<dyn IdentityProvider> = Arc::new(SqliteIdentityProvider::new(repo));
    let app = create_router(state, identity, metrics_handle, &config.metrics.endpoint);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting request insights on {}", addr);
    info!(
        seal_policy = ?config.aggregation.seal_policy,
        seal_threshold = config.aggregation.seal_threshold,
        seal_interval_seconds = config.aggregation.seal_interval_seconds,
        "Aggregation configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    if let Some(handle) = sealer_handle {
        handle.await?;
    }
    writer.flush().await;
    cleanup_handle.abort();

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Wire the aggregation, search and persistence components together
pub fn build_state(
    config: Arc<Config>,
    repo: LogRepository,
    writer: Option<PersistenceWriter>,
) -> AppState {
    let store = Arc::new(AggregateStore::from_config(&config));
    let ingester = Arc::new(LogIngester::new(store, writer));
    let search = SearchQueryEngine::new(
        Arc::new(repo.clone()),
        config.search.max_results,
        config.search.cancel_check_interval,
    );

    AppState {
        config,
        ingester,
        search,
        repo,
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    state: AppState,
    identity: Arc<dyn IdentityProvider>,
    metrics_handle: Option<Arc<PrometheusHandle>>,
    metrics_endpoint: &str,
) -> Router {
    let api_routes = Router::new()
        .route("/api/logs", post(handlers::logs::ingest_log))
        .route("/api/logs/search", get(handlers::logs::search_logs))
        .route(
            "/api/requests/:id/insights",
            get(handlers::insights::list_insights),
        )
        .route(
            "/api/requests/:id/insights/draft",
            get(handlers::insights::draft_insight),
        )
        .route(
            "/api/requests/:id/insights/seal",
            post(handlers::insights::seal_insight),
        )
        .layer(middleware::from_fn_with_state(identity, auth::auth_middleware));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .merge(api_routes)
        .with_state(state);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route(metrics_endpoint, get(handlers::metrics_handler::metrics))
                .with_state(handle),
        );
    }

    app.layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
}
