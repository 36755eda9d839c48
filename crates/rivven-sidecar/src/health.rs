//! Health check HTTP endpoint
//!
//! Provides liveness and readiness probes plus a JSON detail view of both
//! pipeline drivers.

use crate::config::HealthConfig;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Lifecycle of a pipeline driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    /// Not configured
    Disabled,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverStatus::Disabled => write!(f, "disabled"),
            DriverStatus::Starting => write!(f, "starting"),
            DriverStatus::Running => write!(f, "running"),
            DriverStatus::Stopped => write!(f, "stopped"),
            DriverStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Health of a single driver
#[derive(Debug, Clone, Serialize)]
pub struct DriverHealth {
    pub status: DriverStatus,
    pub records_processed: u64,
    pub errors_count: u64,
    pub last_error: Option<String>,
}

impl DriverHealth {
    pub fn new(enabled: bool) -> Self {
        Self {
            status: if enabled {
                DriverStatus::Starting
            } else {
                DriverStatus::Disabled
            },
            records_processed: 0,
            errors_count: 0,
            last_error: None,
        }
    }

    pub fn record_success(&mut self) {
        self.records_processed += 1;
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.errors_count += 1;
        self.last_error = Some(error.to_string());
    }

    fn is_healthy(&self) -> bool {
        matches!(
            self.status,
            DriverStatus::Disabled | DriverStatus::Starting | DriverStatus::Running
        )
    }
}

/// Which driver an update is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Broker,
    Ingress,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Broker => write!(f, "broker"),
            Driver::Ingress => write!(f, "ingress"),
        }
    }
}

/// Health status for the whole sidecar
#[derive(Debug, Clone)]
pub struct HealthState {
    pub started_at: Instant,
    pub broker: DriverHealth,
    pub ingress: DriverHealth,
}

impl HealthState {
    pub fn new(broker_enabled: bool, ingress_enabled: bool) -> Self {
        Self {
            started_at: Instant::now(),
            broker: DriverHealth::new(broker_enabled),
            ingress: DriverHealth::new(ingress_enabled),
        }
    }

    pub fn driver(&self, driver: Driver) -> &DriverHealth {
        match driver {
            Driver::Broker => &self.broker,
            Driver::Ingress => &self.ingress,
        }
    }

    pub fn driver_mut(&mut self, driver: Driver) -> &mut DriverHealth {
        match driver {
            Driver::Broker => &mut self.broker,
            Driver::Ingress => &mut self.ingress,
        }
    }

    /// No driver has failed or stopped
    pub fn is_healthy(&self) -> bool {
        self.broker.is_healthy() && self.ingress.is_healthy()
    }

    /// Healthy, and at least one driver is running
    pub fn is_ready(&self) -> bool {
        self.is_healthy()
            && (self.broker.status == DriverStatus::Running
                || self.ingress.status == DriverStatus::Running)
    }
}

/// Shared health state
pub type SharedHealthState = Arc<RwLock<HealthState>>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    broker: DriverHealth,
    ingress: DriverHealth,
}

async fn health_handler(
    State(state): State<SharedHealthState>,
) -> (StatusCode, Json<HealthResponse>) {
    let state = state.read().await;
    let healthy = state.is_healthy();

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        broker: state.broker.clone(),
        ingress: state.ingress.clone(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

/// Kubernetes readiness probe
async fn readiness_handler(
    State(state): State<SharedHealthState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let ready = state.read().await.is_ready();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(serde_json::json!({ "ready": ready })))
}

/// Kubernetes liveness probe
async fn liveness_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "alive": true }))
}

/// Readiness probe route
pub const READY_PATH: &str = "/ready";
/// Liveness probe route
pub const LIVE_PATH: &str = "/live";

/// Build the health router
pub fn router(config: &HealthConfig, state: SharedHealthState) -> Router {
    Router::new()
        .route(&config.path, get(health_handler))
        .route(READY_PATH, get(readiness_handler))
        .route(LIVE_PATH, get(liveness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health endpoint until `cancel` fires
pub async fn start_health_server(
    config: HealthConfig,
    state: SharedHealthState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if !config.enabled {
        debug!("Health check endpoint disabled");
        return Ok(());
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = TcpListener::bind(addr).await?;
    info!(
        "Health check endpoint listening on http://{}{}",
        addr, config.path
    );

    axum::serve(listener, router(&config, state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}
