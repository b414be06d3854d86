//! Prometheus-kompatible Metriken fuer Dolmetscher
//!
//! Registrierte Metriken:
//! - `dolmetscher_active_rooms` – Gauge: Aktive Raeume
//! - `dolmetscher_connected_clients` – Gauge: Verbundene WebSocket-Clients
//! - `dolmetscher_transcript_events_total` – Counter: Transkript-Ereignisse (kind)
//! - `dolmetscher_translations_total` – Counter: Uebersetzungen (outcome)
//! - `dolmetscher_translation_duration_seconds` – Histogram: Dauer einer Uebersetzung
//! - `dolmetscher_failed_deliveries_total` – Counter: Nicht zustellbare Nachrichten
//! - `dolmetscher_audio_chunks_dropped_total` – Counter: Verworfene Audio-Chunks
//! - `dolmetscher_sweeper_evictions_total` – Counter: Entfernte Teilnehmer (role)
//! - `dolmetscher_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `dolmetscher_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit
//! - `process_*` – Prozess-Metriken (nur Linux)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Dolmetscher-Prometheus-Metriken
#[derive(Clone)]
pub struct DolmetscherMetrics {
    pub registry: Arc<Registry>,

    // Raeume und Verbindungen
    pub active_rooms: Gauge,
    pub connected_clients: Gauge,

    // Sprachdienste
    pub transcript_events_total: IntCounterVec,
    pub translations_total: IntCounterVec,
    pub translation_duration_seconds: Histogram,
    pub audio_chunks_dropped_total: IntCounter,

    // Verteilung
    pub failed_deliveries_total: IntCounter,
    pub sweeper_evictions_total: IntCounterVec,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl DolmetscherMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Raeume und Verbindungen ---
        let active_rooms = Gauge::with_opts(Opts::new(
            "dolmetscher_active_rooms",
            "Anzahl aktiver Raeume",
        ))?;
        registry.register(Box::new(active_rooms.clone()))?;

        let connected_clients = Gauge::with_opts(Opts::new(
            "dolmetscher_connected_clients",
            "Anzahl aktuell verbundener Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        // --- Sprachdienste ---
        let transcript_events_total = IntCounterVec::new(
            Opts::new(
                "dolmetscher_transcript_events_total",
                "Empfangene Transkript-Ereignisse",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(transcript_events_total.clone()))?;

        let translations_total = IntCounterVec::new(
            Opts::new("dolmetscher_translations_total", "Uebersetzungsanfragen"),
            &["outcome"],
        )?;
        registry.register(Box::new(translations_total.clone()))?;

        let translation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "dolmetscher_translation_duration_seconds",
                "Dauer einer Uebersetzung in Sekunden",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(translation_duration_seconds.clone()))?;

        let audio_chunks_dropped_total = IntCounter::with_opts(Opts::new(
            "dolmetscher_audio_chunks_dropped_total",
            "Verworfene Audio-Chunks (Warteschlange voll)",
        ))?;
        registry.register(Box::new(audio_chunks_dropped_total.clone()))?;

        // --- Verteilung ---
        let failed_deliveries_total = IntCounter::with_opts(Opts::new(
            "dolmetscher_failed_deliveries_total",
            "Nachrichten die keinem Client zugestellt werden konnten",
        ))?;
        registry.register(Box::new(failed_deliveries_total.clone()))?;

        let sweeper_evictions_total = IntCounterVec::new(
            Opts::new(
                "dolmetscher_sweeper_evictions_total",
                "Wegen Inaktivitaet entfernte Teilnehmer",
            ),
            &["role"],
        )?;
        registry.register(Box::new(sweeper_evictions_total.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "dolmetscher_http_requests_total",
                "Gesamtanzahl HTTP-Anfragen",
            ),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dolmetscher_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry: Arc::new(registry),
            active_rooms,
            connected_clients,
            transcript_events_total,
            translations_total,
            translation_duration_seconds,
            audio_chunks_dropped_total,
            failed_deliveries_total,
            sweeper_evictions_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: DolmetscherMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<DolmetscherMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = DolmetscherMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn gauge_aktive_raeume_setzen() {
        let metriken = DolmetscherMetrics::neu().unwrap();
        metriken.active_rooms.set(3.0);
        assert_eq!(metriken.active_rooms.get(), 3.0);
    }

    #[test]
    fn uebersetzungen_nach_ergebnis() {
        let metriken = DolmetscherMetrics::neu().unwrap();
        metriken.translations_total.with_label_values(&["ok"]).inc();
        metriken.translations_total.with_label_values(&["ok"]).inc();
        metriken.translations_total.with_label_values(&["error"]).inc();
        assert_eq!(metriken.translations_total.with_label_values(&["ok"]).get(), 2);
        assert_eq!(metriken.translations_total.with_label_values(&["error"]).get(), 1);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = DolmetscherMetrics::neu().unwrap();
        metriken.connected_clients.set(5.0);
        metriken.failed_deliveries_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("dolmetscher_connected_clients 5"));
        assert!(output.contains("dolmetscher_failed_deliveries_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = DolmetscherMetrics::neu().unwrap();

        // Vec-Metriken erscheinen in gather() erst nach dem ersten Label-Zugriff
        metriken
            .transcript_events_total
            .with_label_values(&["final"])
            .inc();
        metriken.translations_total.with_label_values(&["ok"]).inc();
        metriken
            .sweeper_evictions_total
            .with_label_values(&["guest"])
            .inc();
        metriken
            .http_requests_total
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        metriken
            .http_request_duration_seconds
            .with_label_values(&["GET", "/test"])
            .observe(0.01);
        metriken.translation_duration_seconds.observe(0.3);

        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "dolmetscher_active_rooms",
            "dolmetscher_connected_clients",
            "dolmetscher_transcript_events_total",
            "dolmetscher_translations_total",
            "dolmetscher_translation_duration_seconds",
            "dolmetscher_audio_chunks_dropped_total",
            "dolmetscher_failed_deliveries_total",
            "dolmetscher_sweeper_evictions_total",
            "dolmetscher_http_requests_total",
            "dolmetscher_http_request_duration_seconds",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
