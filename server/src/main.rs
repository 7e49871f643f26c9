use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use chatsession_server::config::Config;
use chatsession_server::session::SessionArchive;
use chatsession_server::{AppState, EmailPolicy, SessionManager, api_routes, ws_handler};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

fn uptime_seconds() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime_seconds(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    /// Server uptime in seconds
    uptime_seconds: u64,
    /// Server version
    version: &'static str,
    /// Number of live sessions
    active_sessions: usize,
    /// Open WebSocket connections
    ws_connections: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let (sessions, connections) = state.get_stats().await;

    Json(MetricsResponse {
        uptime_seconds: uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: sessions,
        ws_connections: connections,
    })
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Update gauge metrics for sessions and connections (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    let (sessions, connections) = state.get_stats().await;

    metrics::gauge!("chatsession_sessions_active").set(sessions as f64);
    metrics::gauge!("chatsession_ws_connections_active").set(connections as f64);
    metrics::gauge!("chatsession_uptime_seconds").set(uptime_seconds() as f64);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    START_TIME.set(Instant::now()).ok();

    // Must be installed before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatsession=debug,chatsession_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, max_sessions={}",
        config.host, config.port, config.session.max_sessions
    );

    let email_policy = EmailPolicy::new(&config.email.pattern, config.email.allowlist.clone())?;
    info!(
        "Email policy: pattern={}, allowlisted={}",
        email_policy.pattern(),
        config.email.allowlist.len()
    );

    let mut session_manager = SessionManager::with_config(config.session.to_state_config());
    if let Some(ref path) = config.archive.path {
        info!("Archiving reset sessions to {:?}", path);
        session_manager = session_manager.with_archive(SessionArchive::new(path));
    } else {
        info!("Session archiving disabled (SESSION_ARCHIVE_PATH not set)");
    }

    let app_state = AppState::new()
        .with_session_manager(session_manager)
        .with_email_policy(email_policy)
        .with_history_window(config.session.history_window);

    // Periodic cleanup for idle sessions
    let cleanup_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_state.session_manager.cleanup_idle().await;
        }
    });

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("chatsession server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
