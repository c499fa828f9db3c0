//! Depth Recorder
//!
//! Watches live order books across exchanges and publishes the executable
//! price at each configured depth for every market.

use std::sync::Arc;
use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depth_recorder::watcher::RetryPolicy;
use depth_recorder::{
    AppState, BookSource, Config, DepthSink, LogSink, Metrics, Publisher, RecordQueue, RestSource,
    Scheduler, SourceKind, Watcher, WebSocketSource, WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting depth recorder");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        markets = ?config.markets,
        exchanges = config.exchanges.len(),
        "Configuration loaded"
    );

    let metrics = Metrics::new()?;
    let pool = WorkerPool::new(config.worker_pool_size);
    info!(workers = pool.size(), "Worker pool ready");
    let watchers = build_watchers(&config, &pool).await?;

    let sink: Arc<dyn DepthSink> = match &config.ipc_socket_path {
        Some(path) => Arc::new(Publisher::new(path).await?),
        None => Arc::new(LogSink),
    };
    let (records, _drain) = RecordQueue::spawn(sink, config.sink_queue_capacity, metrics.clone());

    let state = Arc::new(AppState {
        metrics: metrics.clone(),
        config: config.clone(),
        watcher_count: watchers.len(),
    });

    // Start health check server
    tokio::spawn(async move {
        if let Err(e) = start_health_server(state).await {
            warn!(error = %e, "Health server error");
        }
    });

    Scheduler::new(watchers, records, metrics)
        .with_status_interval(config.status_interval())
        .run()
        .await;

    Ok(())
}

/// One watcher per configured exchange and market
async fn build_watchers(config: &Config, pool: &WorkerPool) -> anyhow::Result<Vec<Watcher>> {
    let retry = RetryPolicy::from_config(config);
    let mut watchers = Vec::new();

    for exchange in &config.exchanges {
        let source = match exchange.kind {
            SourceKind::Streaming => BookSource::Streaming(Arc::new(WebSocketSource::new(
                &exchange.endpoint,
                config.reconnect_delay_ms,
            ))),
            SourceKind::Polling => {
                // The blocking client refuses to be built on a runtime thread
                let endpoint = exchange.endpoint.clone();
                let timeout = config.request_timeout();
                let rest = tokio::task::spawn_blocking(move || RestSource::new(&endpoint, timeout)).await??;
                BookSource::Polling {
                    source: Arc::new(rest),
                    pool: pool.clone(),
                }
            }
        };

        let limit = config.order_book_limit(&exchange.name);
        for market in &config.markets {
            let targets = config.depth_targets(market).unwrap_or_default().to_vec();
            info!(
                exchange = %exchange.name,
                market = %market,
                source = source.kind(),
                limit,
                "Watching market"
            );
            watchers.push(
                Watcher::new(exchange.name.clone(), market.clone(), source.clone(), targets)
                    .with_order_book_limit(limit)
                    .with_min_fetch_interval(config.min_fetch_interval())
                    .with_retry_policy(retry),
            );
        }
    }

    Ok(watchers)
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "depth-recorder",
        "watchers": state.watcher_count,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.encode()
}
