//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

use axum::{Json, Router, body::Body, http::Request, routing::get};
use chatsession_server::session::state::SessionConfig;
use chatsession_server::{AppState, EmailPolicy, SessionManager, api_routes, ws_handler};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tower::util::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the router the binary serves, around the given state
pub fn build_app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes())
        .with_state(app_state)
        .layer(cors)
}

/// Create a test application router with state
pub fn create_test_app_with_state() -> (Router, AppState) {
    let app_state = AppState::new().with_email_policy(
        EmailPolicy::new(
            r"^\d{2}f\d{7}@ds\.study\.iitm\.ac\.in$",
            vec!["staff@example.org".to_string()],
        )
        .unwrap(),
    );
    (build_app(app_state.clone()), app_state)
}

/// Create a test application router with all routes configured
pub fn create_test_app() -> Router {
    create_test_app_with_state().0
}

/// App whose session manager accepts at most `max_sessions`
#[allow(dead_code)]
pub fn create_test_app_with_limit(max_sessions: usize) -> Router {
    let manager = SessionManager::with_config(SessionConfig {
        max_sessions,
        ..SessionConfig::default()
    });
    build_app(AppState::new().with_session_manager(manager))
}

/// Send a request and decode the JSON body
pub async fn send_json<T: DeserializeOwned>(
    app: &Router,
    request: Request<Body>,
) -> (axum::http::StatusCode, T) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// JSON POST request
pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Start a test server on a random port
#[allow(dead_code)]
pub async fn start_test_server() -> (SocketAddr, AppState, tokio::task::JoinHandle<()>) {
    let (app, state) = create_test_app_with_state();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, state, handle)
}

/// Initialize test logging for detailed output
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatsession_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
