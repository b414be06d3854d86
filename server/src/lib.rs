//! dolmetscher-server – Bibliotheks-Root
//!
//! Verdrahtet Registry, Signaling, Sprachdienste und Observability zu einem
//! Axum-Server. Der Einstiegspunkt fuer Integrationstests ist
//! [`Server::router`].

pub mod config;
pub mod dienste;

use anyhow::{Context, Result};
use axum::{http::HeaderValue, Router};
use config::{ServerConfig, API_KEY_ENV};
use dienste::Sprachdienste;
use dolmetscher_observability::{
    observability_router, request_timing_layer, timing_middleware, DolmetscherMetrics,
    HealthState,
};
use dolmetscher_rooms::RoomRegistry;
use dolmetscher_signaling::{signaling_router, LivenessSweeper, SignalingState};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    pub state: Arc<SignalingState>,
    metriken: Option<DolmetscherMetrics>,
    dienste_konfiguriert: bool,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    ///
    /// Der API-Key wird aus der Konfiguration oder `OPENAI_API_KEY` gelesen.
    pub fn neu(config: ServerConfig) -> Result<Self> {
        let env_key = std::env::var(API_KEY_ENV).ok();
        let dienste = Sprachdienste::aus_config(&config, env_key.as_deref());
        Self::mit_diensten(config, dienste)
    }

    pub fn mit_diensten(config: ServerConfig, dienste: Sprachdienste) -> Result<Self> {
        let metriken = if config.observability.aktiviert {
            Some(DolmetscherMetrics::neu().context("Metriken konnten nicht registriert werden")?)
        } else {
            None
        };

        let state = SignalingState::neu(
            config.signaling_config(),
            RoomRegistry::neu(config.registry_config()),
            dienste.transkription,
            dienste.uebersetzer,
            metriken.clone(),
        );

        Ok(Self {
            config,
            state,
            metriken,
            dienste_konfiguriert: dienste.konfiguriert,
        })
    }

    /// Vollstaendiger Router: Raum-API, WebSocket, `/health`, `/metrics`
    pub fn router(&self) -> Result<Router> {
        let mut app = signaling_router(Arc::clone(&self.state));

        if let Some(metriken) = &self.metriken {
            app = app.route_layer(axum::middleware::from_fn_with_state(
                metriken.clone(),
                timing_middleware,
            ));
            let health = HealthState::neu(self.state.clone(), self.dienste_konfiguriert);
            app = app.merge(observability_router(metriken.clone(), health));
        }

        Ok(app.layer(self.cors_layer()?).layer(request_timing_layer()))
    }

    fn cors_layer(&self) -> Result<CorsLayer> {
        let origins = &self.config.netzwerk.cors_origins;
        if origins.is_empty() {
            return Ok(CorsLayer::permissive());
        }
        let erlaubt = origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .with_context(|| format!("Ungueltiger CORS-Origin: {o}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(erlaubt))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any))
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Listener binden
    /// 2. Liveness-Sweeper starten
    /// 3. HTTP/WebSocket-Server starten
    /// 4. Auf Ctrl-C warten, dann Verbindungen und Sitzungen beenden
    pub async fn starten(self) -> Result<()> {
        let adresse = self.config.bind_adresse();
        let app = self.router()?;
        let listener = tokio::net::TcpListener::bind(&adresse)
            .await
            .with_context(|| format!("Bind auf {adresse} fehlgeschlagen"))?;

        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %adresse,
            max_teilnehmer = self.config.raeume.max_teilnehmer,
            dienste_konfiguriert = self.dienste_konfiguriert,
            "Server startet"
        );

        let sweeper =
            LivenessSweeper::neu(Arc::clone(&self.state), self.config.sweeper_config()).starten();

        let state = Arc::clone(&self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Ctrl-C-Handler fehlgeschlagen: {}", e);
                }
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                state.herunterfahren().await;
            })
            .await
            .context("HTTP-Server beendet mit Fehler")?;

        if let Err(e) = sweeper.await {
            tracing::warn!("Liveness-Sweeper abgebrochen: {}", e);
        }
        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn server() -> Server {
        let config = ServerConfig::default();
        let dienste = Sprachdienste::aus_config(&config, None);
        Server::mit_diensten(config, dienste).unwrap()
    }

    async fn get(app: &Router, pfad: &str) -> (StatusCode, String) {
        let antwort = app
            .clone()
            .oneshot(Request::builder().uri(pfad).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = antwort.status();
        let bytes = axum::body::to_bytes(antwort.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn health_ohne_dienste_ist_degraded() {
        let app = server().router().unwrap();
        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"degraded\""));
        assert!(body.contains("\"active_rooms\":0"));
    }

    #[tokio::test]
    async fn raum_api_wird_in_metriken_gezaehlt() {
        let app = server().router().unwrap();
        let antwort = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rooms/create/host")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::CREATED);

        let (_, metriken) = get(&app, "/metrics").await;
        assert!(metriken.contains("/api/rooms/create/:user_id"));
        assert!(metriken.contains("dolmetscher_active_rooms 1"));
    }

    #[test]
    fn ungueltiger_cors_origin_wird_abgelehnt() {
        let mut config = ServerConfig::default();
        config.netzwerk.cors_origins = vec!["http://ok.example".into(), "ung\u{7f}ltig".into()];
        let dienste = Sprachdienste::aus_config(&config, None);
        let server = Server::mit_diensten(config, dienste).unwrap();
        assert!(server.router().is_err());
    }
}
