//! # dolmetscher-observability
//!
//! Observability-Crate fuer Dolmetscher:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber
//! - Request-Timing Middleware

pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use health::{health_router, AuslastungsQuelle, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, DolmetscherMetrics};
pub use middleware::{request_timing_layer, timing_middleware};

use axum::Router;

/// Router mit `/metrics` und `/health`
pub fn observability_router(metriken: DolmetscherMetrics, health: HealthState) -> Router {
    Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health))
}
