//! Health-Check-Endpunkt fuer Dolmetscher
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und aktueller Auslastung

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Server laeuft, aber Sprachdienste sind nicht konfiguriert
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_rooms: usize,
    pub connected_clients: usize,
}

/// Liefert die aktuelle Auslastung fuer den Health-Check
pub trait AuslastungsQuelle: Send + Sync {
    fn aktive_raeume(&self) -> usize;
    fn verbundene_clients(&self) -> usize;
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    quelle: Arc<dyn AuslastungsQuelle>,
    dienste_konfiguriert: bool,
}

impl HealthState {
    pub fn neu(quelle: Arc<dyn AuslastungsQuelle>, dienste_konfiguriert: bool) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            quelle,
            dienste_konfiguriert,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Erstellt die aktuelle Health-Antwort
    pub fn bericht(&self) -> HealthResponse {
        let status = if self.dienste_konfiguriert {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            active_rooms: self.quelle.aktive_raeume(),
            connected_clients: self.quelle.verbundene_clients(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
///
/// Auch bei `degraded` 200, die Probe soll nicht fehlschlagen.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.bericht()))
}
