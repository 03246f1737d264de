//! Alert Proxy Server
//!
//! Receives Grafana webhooks, gates container alerts through the suppression
//! store and every alert through the cooldown cache, and forwards the rest to
//! the notifier. Optionally runs the inventory monitor alongside.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use alerting::{CooldownCache, Notifier};
use inventory::{EntityVerifier, FailPolicy};
use suppression::SuppressionStore;

pub mod config;
pub mod payload;
mod routes;

pub use self::config::{AppConfig, ConfigError};

/// Application state shared across handlers
pub struct AppState {
    pub cooldown: Arc<CooldownCache>,
    pub cooldown_enabled: bool,
    pub suppression: Arc<SuppressionStore>,
    pub notifier: Arc<dyn Notifier>,
    /// Present when container verification is enabled
    pub verifier: Option<Arc<EntityVerifier>>,
    pub fail_policy: FailPolicy,
    /// Webhook container alerts are dropped while the monitor owns them
    pub monitor_only_source: bool,
    pub call_timeout: Duration,
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        cooldown: Arc<CooldownCache>,
        suppression: Arc<SuppressionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cooldown,
            cooldown_enabled: true,
            suppression,
            notifier,
            verifier: None,
            fail_policy: FailPolicy::Open,
            monitor_only_source: false,
            call_timeout: Duration::from_secs(5),
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub inventory: String,
    pub cooldown_entries: usize,
    pub suppression_entries: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/alert", post(routes::alerts::post_alert))
        .route("/metrics", get(metrics_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let inventory = if state.verifier.is_some() {
        "enabled"
    } else {
        "disabled"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        service: "alert-proxy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            inventory: inventory.to_string(),
            cooldown_entries: state.cooldown.len(),
            suppression_entries: state.suppression.len(),
        },
    })
}

/// Prometheus exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed\n".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(debug_mode: bool) {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already set");
    }
}

/// Serve `app` on `addr` until `shutdown` completes
pub async fn run_server<F>(addr: &str, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting alert proxy on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
