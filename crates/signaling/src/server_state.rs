//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Verbindungsverzeichnis, laufende Host-Sitzungen und die
//! Sprachdienste. Wird als `Arc<SignalingState>` zwischen allen Tasks und
//! Axum-Handlern geteilt.

use dashmap::DashMap;
use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_observability::{AuslastungsQuelle, DolmetscherMetrics};
use dolmetscher_protocol::{HostStatus, ServerMessage};
use dolmetscher_rooms::{LeaveOutcome, RoomRegistry, SweepReport, VerlassenerRaum};
use dolmetscher_speech::{TranscriptionBackend, Translator};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::broadcast::{ConnectionDirectory, SEND_QUEUE_GROESSE};
use crate::session::{SessionConfig, SessionCoordinator, SessionKontext};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Ohne eingehende Nachricht wird nach so vielen Sekunden ein Ping gesendet
    pub keepalive_sek: u64,
    /// Ohne eingehende Nachricht wird die Verbindung nach so vielen Sekunden getrennt
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Send-Queue pro Client
    pub send_queue: usize,
    pub session: SessionConfig,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            send_queue: SEND_QUEUE_GROESSE,
            session: SessionConfig::default(),
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: SignalingConfig,
    pub registry: RoomRegistry,
    pub verzeichnis: ConnectionDirectory,
    /// Laufende Host-Sitzungen, indiziert nach Raum
    pub sitzungen: DashMap<RoomCode, Arc<SessionCoordinator>>,
    pub transkription: Arc<dyn TranscriptionBackend>,
    pub uebersetzer: Arc<dyn Translator>,
    pub metriken: Option<DolmetscherMetrics>,
    shutdown_tx: watch::Sender<bool>,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    pub fn neu(
        config: SignalingConfig,
        registry: RoomRegistry,
        transkription: Arc<dyn TranscriptionBackend>,
        uebersetzer: Arc<dyn Translator>,
        metriken: Option<DolmetscherMetrics>,
    ) -> Arc<Self> {
        let verzeichnis =
            ConnectionDirectory::mit_optionen(registry.clone(), config.send_queue, metriken.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry,
            verzeichnis,
            sitzungen: DashMap::new(),
            transkription,
            uebersetzer,
            metriken,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // -----------------------------------------------------------------------
    // Host-Sitzungen
    // -----------------------------------------------------------------------

    /// Startet eine neue Host-Sitzung; eine bestehende des Raums wird gestoppt
    pub fn sitzung_starten(&self, raum: RoomCode, host_id: UserId) -> Arc<SessionCoordinator> {
        let kontext = SessionKontext {
            verzeichnis: self.verzeichnis.clone(),
            transkription: Arc::clone(&self.transkription),
            uebersetzer: Arc::clone(&self.uebersetzer),
            metriken: self.metriken.clone(),
            config: self.config.session.clone(),
        };
        let sitzung = SessionCoordinator::starten(raum.clone(), host_id, kontext);
        if let Some(alt) = self.sitzungen.insert(raum, Arc::clone(&sitzung)) {
            alt.stoppen();
        }
        sitzung
    }

    pub fn sitzung(&self, raum: &RoomCode) -> Option<Arc<SessionCoordinator>> {
        self.sitzungen.get(raum).map(|s| Arc::clone(s.value()))
    }

    /// Entfernt und stoppt die Sitzung des Raums
    ///
    /// Mit `nur` wird nur genau diese Sitzung entfernt (nicht eine neuere
    /// nach einem Reconnect des Hosts).
    pub fn sitzung_beenden(&self, raum: &RoomCode, nur: Option<&Arc<SessionCoordinator>>) {
        let entfernt = match nur {
            Some(sitzung) => self
                .sitzungen
                .remove_if(raum, |_, s| Arc::ptr_eq(s, sitzung)),
            None => self.sitzungen.remove(raum),
        };
        if let Some((_, sitzung)) = entfernt {
            sitzung.stoppen();
        } else if let Some(sitzung) = nur {
            sitzung.stoppen();
        }
    }

    // -----------------------------------------------------------------------
    // Raum-Ereignisse an die Clients melden
    // -----------------------------------------------------------------------

    /// Verlaesst den Raum und benachrichtigt die Betroffenen
    ///
    /// Die Verbindung des Verlassenden wird abgemeldet; verlaesst der Host,
    /// werden alle ehemaligen Gaeste informiert und ebenfalls abgemeldet.
    pub fn verlassen_und_melden(&self, user_id: &UserId) -> LeaveOutcome {
        let ergebnis = self.registry.raum_verlassen(user_id);
        match &ergebnis {
            LeaveOutcome::NichtImRaum => {}
            LeaveOutcome::GastEntfernt { code, verbleibend } => {
                self.gast_weg_melden(code, user_id, *verbleibend);
                self.verzeichnis.abmelden(user_id);
            }
            LeaveOutcome::RaumGeschlossen { code, gaeste } => {
                self.raum_geschlossen_melden(code, user_id, gaeste, HostStatus::Left);
            }
        }
        self.raum_metrik_aktualisieren();
        ergebnis
    }

    /// Meldet dem alten Raum einen erfolgreichen Raumwechsel
    ///
    /// Die bestehende Verbindung gehoert noch zum alten Raum und wird
    /// abgemeldet.
    pub fn raumwechsel_melden(&self, user_id: &UserId, verlassen: &VerlassenerRaum) {
        self.gast_weg_melden(&verlassen.code, user_id, verlassen.verbleibend);
        self.verzeichnis.abmelden(user_id);
    }

    /// Meldet das Ergebnis eines Liveness-Durchlaufs an die Clients
    pub fn bereinigung_melden(&self, bericht: &SweepReport) {
        for gast in &bericht.entfernte_gaeste {
            self.gast_weg_melden(&gast.code, &gast.user_id, gast.verbleibend);
            self.verzeichnis.abmelden(&gast.user_id);
        }
        for raum in &bericht.deaktivierte_raeume {
            self.raum_geschlossen_melden(&raum.code, &raum.host_id, &raum.gaeste, HostStatus::Timeout);
        }

        if let Some(m) = &self.metriken {
            m.sweeper_evictions_total
                .with_label_values(&["guest"])
                .inc_by(bericht.entfernte_gaeste.len() as u64);
            m.sweeper_evictions_total
                .with_label_values(&["host"])
                .inc_by(bericht.deaktivierte_raeume.len() as u64);
        }
        self.raum_metrik_aktualisieren();
    }

    pub fn raum_metrik_aktualisieren(&self) {
        if let Some(m) = &self.metriken {
            m.active_rooms.set(self.registry.aktive_raeume() as f64);
        }
    }

    fn gast_weg_melden(&self, code: &RoomCode, user_id: &UserId, verbleibend: usize) {
        self.verzeichnis
            .an_raum_senden(code, ServerMessage::user_left(user_id.clone()), None);
        self.verzeichnis
            .an_raum_senden(code, ServerMessage::participant_count(verbleibend), None);
    }

    /// Der Raum ist bereits inaktiv, daher direkt an die ehemaligen Mitglieder
    fn raum_geschlossen_melden(
        &self,
        code: &RoomCode,
        host_id: &UserId,
        gaeste: &[UserId],
        status: HostStatus,
    ) {
        for gast in gaeste {
            let _ = self
                .verzeichnis
                .an_user_senden(gast, ServerMessage::host_status(status));
            let _ = self
                .verzeichnis
                .an_user_senden(gast, ServerMessage::user_left(host_id.clone()));
            self.verzeichnis.abmelden(gast);
        }
        self.verzeichnis.abmelden(host_id);
        self.sitzung_beenden(code, None);
        tracing::info!(room = %code, status = ?status, gaeste = gaeste.len(), "Raum geschlossen");
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    pub fn shutdown_empfaenger(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Trennt alle Verbindungen und stoppt alle Sitzungen
    ///
    /// Wartet bis das bereits gepufferte Audio abgegeben wurde.
    pub async fn herunterfahren(&self) {
        self.shutdown_tx.send_replace(true);
        let sitzungen: Vec<Arc<SessionCoordinator>> = self
            .sitzungen
            .iter()
            .map(|s| Arc::clone(s.value()))
            .collect();
        self.sitzungen.clear();
        for sitzung in &sitzungen {
            sitzung.stoppen();
        }
        for sitzung in &sitzungen {
            sitzung.beendet().await;
        }
        tracing::info!(sitzungen = sitzungen.len(), "Signaling heruntergefahren");
    }
}

impl AuslastungsQuelle for SignalingState {
    fn aktive_raeume(&self) -> usize {
        self.registry.aktive_raeume()
    }

    fn verbundene_clients(&self) -> usize {
        self.verzeichnis.client_anzahl()
    }
}
