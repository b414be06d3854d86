//! Host-Sitzung – Audio rein, Transkripte und Uebersetzungen raus
//!
//! Pro verbundenem Host existiert genau ein `SessionCoordinator`. Er leitet
//! das Audio des Hosts an den Transkriptionsdienst weiter, verteilt dessen
//! Ereignisse an den Raum und stoesst fuer finale Abschnitte die
//! Uebersetzungen fuer die Gaeste an.
//!
//! ## Tasks
//! - Audio-Task: besitzt den `AudioSink`, liest die begrenzte Audio-Queue
//! - Ereignis-Task: verarbeitet Transkript-Ereignisse strikt sequentiell
//! - Pro finalem Abschnitt und Zielsprache ein Uebersetzungs-Task
//!
//! ## Zustaende
//! `Verbindet -> Streamt -> Gestoppt`, `Gestoppt` ist endgueltig.

use bytes::Bytes;
use dashmap::DashMap;
use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_observability::DolmetscherMetrics;
use dolmetscher_protocol::ServerMessage;
use dolmetscher_speech::{TranscriptEvent, TranscriptionBackend, Translator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::broadcast::ConnectionDirectory;
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximal wartende Audio-Chunks, weitere werden verworfen
    pub audio_queue: usize,
    /// Puffer zwischen Transkriptionsdienst und Ereignis-Task
    pub ereignis_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_queue: 256,
            ereignis_queue: 64,
        }
    }
}

/// Alles was eine Sitzung von aussen braucht
#[derive(Clone)]
pub struct SessionKontext {
    pub verzeichnis: ConnectionDirectory,
    pub transkription: Arc<dyn TranscriptionBackend>,
    pub uebersetzer: Arc<dyn Translator>,
    pub metriken: Option<DolmetscherMetrics>,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Verbindet,
    Streamt,
    Gestoppt,
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

pub struct SessionCoordinator {
    raum: RoomCode,
    host_id: UserId,
    verzeichnis: ConnectionDirectory,
    uebersetzer: Arc<dyn Translator>,
    metriken: Option<DolmetscherMetrics>,
    /// Zielsprache pro Gast (fehlt = keine Uebersetzung)
    sprachen: DashMap<UserId, String>,
    status: watch::Sender<SessionStatus>,
    audio_tx: mpsc::Sender<Bytes>,
    audio_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Erstellt die Sitzung und startet Audio- und Ereignis-Task
    ///
    /// Die Verbindung zum Transkriptionsdienst wird im Hintergrund
    /// aufgebaut; bis dahin eintreffendes Audio wird gepuffert.
    pub fn starten(raum: RoomCode, host_id: UserId, kontext: SessionKontext) -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::channel(kontext.config.audio_queue.max(1));
        let (ereignis_tx, ereignis_rx) = mpsc::channel(kontext.config.ereignis_queue.max(1));
        let (status, status_rx) = watch::channel(SessionStatus::Verbindet);

        let sitzung = Arc::new(Self {
            raum,
            host_id,
            verzeichnis: kontext.verzeichnis,
            uebersetzer: kontext.uebersetzer,
            metriken: kontext.metriken,
            sprachen: DashMap::new(),
            status,
            audio_tx,
            audio_task: Mutex::new(None),
        });

        let audio_task = tokio::spawn(Arc::clone(&sitzung).audio_schleife(
            kontext.transkription,
            ereignis_tx,
            audio_rx,
            status_rx,
        ));
        if let Ok(mut slot) = sitzung.audio_task.try_lock() {
            *slot = Some(audio_task);
        }
        tokio::spawn(Arc::clone(&sitzung).ereignis_schleife(ereignis_rx));

        tracing::info!(room = %sitzung.raum, host = %sitzung.host_id, "Host-Sitzung gestartet");
        sitzung
    }

    pub fn raum(&self) -> &RoomCode {
        &self.raum
    }

    pub fn host_id(&self) -> &UserId {
        &self.host_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Reiht einen Audio-Chunk ein
    ///
    /// No-op nach `stoppen`. Ist die Queue voll, wird der Chunk verworfen.
    pub fn audio_verarbeiten(&self, chunk: Bytes) -> bool {
        if self.status() == SessionStatus::Gestoppt {
            return false;
        }
        match self.audio_tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(room = %self.raum, "Audio-Queue voll – Chunk verworfen");
                if let Some(m) = &self.metriken {
                    m.audio_chunks_dropped_total.inc();
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Vorlaeufiger Text: nur an den Raum, keine Uebersetzung
    pub fn teiltranskript_empfangen(&self, text: &str) {
        self.verzeichnis
            .an_raum_senden(&self.raum, ServerMessage::partial(text), None);
    }

    /// Finaler Text: erst an den Raum, dann eine Uebersetzung pro Zielsprache
    ///
    /// Gibt die Handles der gestarteten Uebersetzungen zurueck.
    pub fn endtranskript_empfangen(&self, text: &str, confidence: f64) -> Vec<JoinHandle<()>> {
        self.verzeichnis
            .an_raum_senden(&self.raum, ServerMessage::final_text(text, confidence), None);

        self.empfaenger_nach_sprache()
            .into_iter()
            .map(|(sprache, empfaenger)| {
                tokio::spawn(uebersetzung_verteilen(
                    Arc::clone(&self.uebersetzer),
                    self.verzeichnis.clone(),
                    self.metriken.clone(),
                    text.to_string(),
                    sprache,
                    empfaenger,
                ))
            })
            .collect()
    }

    /// Setzt die Zielsprache eines Gastes und bestaetigt sie ihm
    ///
    /// Eine leere Sprache entfernt die Praeferenz.
    pub fn sprache_setzen(&self, user_id: &UserId, sprache: &str) -> SignalingResult<()> {
        let sprache = sprache.trim();
        let raum = self
            .verzeichnis
            .registry()
            .raum(&self.raum)
            .filter(|r| r.ist_aktiv)
            .ok_or_else(|| SignalingError::KeineSitzung(self.raum.clone()))?;
        if !raum.ist_gast(user_id) {
            return Err(SignalingError::protokoll(
                "Nur Gaeste des Raums koennen eine Sprache waehlen",
            ));
        }

        if sprache.is_empty() {
            self.sprachen.remove(user_id);
        } else {
            self.sprachen.insert(user_id.clone(), sprache.to_string());
        }
        tracing::debug!(room = %self.raum, user_id = %user_id, sprache, "Zielsprache gesetzt");

        self.verzeichnis
            .an_user_senden(user_id, ServerMessage::language_confirmed(sprache))
    }

    pub fn sprache_von(&self, user_id: &UserId) -> Option<String> {
        self.sprachen.get(user_id).map(|s| s.clone())
    }

    /// Fehler des Transkriptionsdienstes an den Raum melden
    pub fn transkriptionsfehler(&self, nachricht: &str) {
        tracing::warn!(room = %self.raum, "Transkriptionsfehler: {}", nachricht);
        self.verzeichnis.an_raum_senden(
            &self.raum,
            ServerMessage::error(format!("Transkriptionsfehler: {nachricht}")),
            None,
        );
    }

    /// Stoppt die Sitzung (idempotent)
    ///
    /// Der Audio-Task verarbeitet noch wartende Chunks und schliesst dann
    /// die Verbindung zum Transkriptionsdienst.
    pub fn stoppen(&self) {
        let vorher = self.status.send_replace(SessionStatus::Gestoppt);
        if vorher != SessionStatus::Gestoppt {
            tracing::info!(room = %self.raum, host = %self.host_id, "Host-Sitzung gestoppt");
        }
    }

    /// Wartet bis der Audio-Task beendet ist (nach `stoppen`)
    pub async fn beendet(&self) {
        let handle = self.audio_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(room = %self.raum, "Audio-Task abgebrochen: {}", e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Interne Tasks
    // -----------------------------------------------------------------------

    /// Gaeste mit Zielsprache, gruppiert nach Sprache
    ///
    /// Praeferenzen von Benutzern die nicht mehr Gast sind werden verworfen.
    fn empfaenger_nach_sprache(&self) -> HashMap<String, Vec<UserId>> {
        let gaeste = match self.verzeichnis.registry().raum(&self.raum) {
            Some(r) if r.ist_aktiv => r.gaeste,
            _ => return HashMap::new(),
        };
        self.sprachen.retain(|user, _| gaeste.contains(user));

        let mut gruppen: HashMap<String, Vec<UserId>> = HashMap::new();
        for eintrag in self.sprachen.iter() {
            gruppen
                .entry(eintrag.value().clone())
                .or_default()
                .push(eintrag.key().clone());
        }
        gruppen
    }

    async fn audio_schleife(
        self: Arc<Self>,
        backend: Arc<dyn TranscriptionBackend>,
        ereignis_tx: mpsc::Sender<TranscriptEvent>,
        mut audio_rx: mpsc::Receiver<Bytes>,
        mut status_rx: watch::Receiver<SessionStatus>,
    ) {
        let mut sink = match backend.sitzung_oeffnen(ereignis_tx).await {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(room = %self.raum, "Transkription nicht verfuegbar: {}", e);
                self.transkriptionsfehler(&e.to_string());
                self.stoppen();
                return;
            }
        };

        self.status.send_if_modified(|s| {
            if *s == SessionStatus::Verbindet {
                *s = SessionStatus::Streamt;
                true
            } else {
                false
            }
        });

        loop {
            if *status_rx.borrow_and_update() == SessionStatus::Gestoppt {
                break;
            }
            tokio::select! {
                geaendert = status_rx.changed() => {
                    if geaendert.is_err() {
                        break;
                    }
                }
                chunk = audio_rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    if let Err(e) = sink.audio_senden(chunk).await {
                        self.transkriptionsfehler(&e.to_string());
                        self.stoppen();
                        break;
                    }
                }
            }
        }

        // Bereits eingereihtes Audio noch abgeben
        while let Ok(chunk) = audio_rx.try_recv() {
            if sink.audio_senden(chunk).await.is_err() {
                break;
            }
        }
        if let Err(e) = sink.schliessen().await {
            tracing::warn!(room = %self.raum, "Schliessen der Transkription fehlgeschlagen: {}", e);
        }
        tracing::debug!(room = %self.raum, "Audio-Task beendet");
    }

    async fn ereignis_schleife(self: Arc<Self>, mut ereignisse: mpsc::Receiver<TranscriptEvent>) {
        while let Some(ereignis) = ereignisse.recv().await {
            if let Some(m) = &self.metriken {
                m.transcript_events_total
                    .with_label_values(&[ereignis.art()])
                    .inc();
            }
            match ereignis {
                TranscriptEvent::Geoeffnet => {
                    tracing::debug!(room = %self.raum, "Transkription verbunden");
                }
                TranscriptEvent::Partial(text) => self.teiltranskript_empfangen(&text),
                TranscriptEvent::Final { text, confidence } => {
                    self.endtranskript_empfangen(&text, confidence);
                }
                TranscriptEvent::Fehler(nachricht) => self.transkriptionsfehler(&nachricht),
                TranscriptEvent::Geschlossen => {
                    tracing::debug!(room = %self.raum, "Transkription geschlossen");
                    break;
                }
            }
        }
    }
}

/// Uebersetzt `text` einmal und verteilt das Ergebnis an alle `empfaenger`
async fn uebersetzung_verteilen(
    uebersetzer: Arc<dyn Translator>,
    verzeichnis: ConnectionDirectory,
    metriken: Option<DolmetscherMetrics>,
    text: String,
    sprache: String,
    empfaenger: Vec<UserId>,
) {
    let start = Instant::now();
    let ergebnis = uebersetzer.uebersetzen(&text, &sprache).await;
    if let Some(m) = &metriken {
        let outcome = if ergebnis.is_ok() { "ok" } else { "error" };
        m.translations_total.with_label_values(&[outcome]).inc();
        m.translation_duration_seconds
            .observe(start.elapsed().as_secs_f64());
    }

    let nachricht = match ergebnis {
        Ok(uebersetzung) => ServerMessage::translation(uebersetzung, text.as_str(), sprache.as_str()),
        Err(e) => {
            tracing::warn!(sprache = %sprache, "Uebersetzung fehlgeschlagen: {}", e);
            ServerMessage::error(format!("Uebersetzung nach {sprache} fehlgeschlagen"))
        }
    };
    for user_id in &empfaenger {
        let _ = verzeichnis.an_user_senden(user_id, nachricht.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dolmetscher_protocol::ServerPayload;
    use dolmetscher_rooms::RoomRegistry;
    use dolmetscher_speech::{AudioSink, SpeechError, SpeechResult};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Aufzeichnung {
        audio: StdMutex<Vec<Bytes>>,
        geschlossen: StdMutex<bool>,
    }

    struct AufzeichnendesBackend {
        aufzeichnung: Arc<Aufzeichnung>,
        fehlschlagen: bool,
    }

    struct AufzeichnenderSink(Arc<Aufzeichnung>);

    #[async_trait]
    impl AudioSink for AufzeichnenderSink {
        async fn audio_senden(&mut self, chunk: Bytes) -> SpeechResult<()> {
            self.0.audio.lock().unwrap().push(chunk);
            Ok(())
        }
        async fn schliessen(&mut self) -> SpeechResult<()> {
            *self.0.geschlossen.lock().unwrap() = true;
            Ok(())
        }
    }

    #[async_trait]
    impl TranscriptionBackend for AufzeichnendesBackend {
        async fn sitzung_oeffnen(
            &self,
            _ereignisse: mpsc::Sender<TranscriptEvent>,
        ) -> SpeechResult<Box<dyn AudioSink>> {
            if self.fehlschlagen {
                return Err(SpeechError::NichtKonfiguriert("kein Dienst".into()));
            }
            Ok(Box::new(AufzeichnenderSink(Arc::clone(&self.aufzeichnung))))
        }
    }

    struct EchoUebersetzer;

    #[async_trait]
    impl Translator for EchoUebersetzer {
        async fn uebersetzen(&self, text: &str, zielsprache: &str) -> SpeechResult<String> {
            Ok(format!("[{zielsprache}] {text}"))
        }
    }

    fn uid(name: &str) -> UserId {
        UserId::from(name)
    }

    struct Aufbau {
        sitzung: Arc<SessionCoordinator>,
        verzeichnis: ConnectionDirectory,
        aufzeichnung: Arc<Aufzeichnung>,
    }

    fn aufbauen(fehlschlagen: bool, config: SessionConfig) -> Aufbau {
        let registry = RoomRegistry::default();
        let code = registry.raum_erstellen(uid("host")).unwrap().code;
        registry.raum_beitreten(&code, uid("gast")).unwrap();
        let verzeichnis = ConnectionDirectory::neu(registry);
        let aufzeichnung = Arc::new(Aufzeichnung::default());

        let kontext = SessionKontext {
            verzeichnis: verzeichnis.clone(),
            transkription: Arc::new(AufzeichnendesBackend {
                aufzeichnung: Arc::clone(&aufzeichnung),
                fehlschlagen,
            }),
            uebersetzer: Arc::new(EchoUebersetzer),
            metriken: None,
            config,
        };
        Aufbau {
            sitzung: SessionCoordinator::starten(code, uid("host"), kontext),
            verzeichnis,
            aufzeichnung,
        }
    }

    async fn warte_auf_status(sitzung: &SessionCoordinator, status: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while sitzung.status() != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Status nicht erreicht");
    }

    #[tokio::test]
    async fn audio_wird_in_reihenfolge_weitergereicht() {
        let aufbau = aufbauen(false, SessionConfig::default());
        warte_auf_status(&aufbau.sitzung, SessionStatus::Streamt).await;

        for i in 0u8..5 {
            assert!(aufbau.sitzung.audio_verarbeiten(Bytes::from(vec![i; 4])));
        }
        aufbau.sitzung.stoppen();
        aufbau.sitzung.beendet().await;

        let audio = aufbau.aufzeichnung.audio.lock().unwrap();
        assert_eq!(audio.len(), 5);
        for (i, chunk) in audio.iter().enumerate() {
            assert_eq!(chunk[0], i as u8);
        }
        assert!(*aufbau.aufzeichnung.geschlossen.lock().unwrap());
    }

    #[tokio::test]
    async fn stoppen_ist_idempotent_und_audio_danach_no_op() {
        let aufbau = aufbauen(false, SessionConfig::default());
        aufbau.sitzung.stoppen();
        aufbau.sitzung.stoppen();
        assert_eq!(aufbau.sitzung.status(), SessionStatus::Gestoppt);
        assert!(!aufbau.sitzung.audio_verarbeiten(Bytes::from_static(&[1, 2])));

        aufbau.sitzung.beendet().await;
        aufbau.sitzung.beendet().await;
        assert!(aufbau.aufzeichnung.audio.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn volle_audio_queue_verwirft_chunks() {
        let aufbau = aufbauen(
            false,
            SessionConfig {
                audio_queue: 2,
                ..Default::default()
            },
        );
        // Ohne await laeuft der Audio-Task noch nicht (current_thread)
        assert!(aufbau.sitzung.audio_verarbeiten(Bytes::from_static(&[1])));
        assert!(aufbau.sitzung.audio_verarbeiten(Bytes::from_static(&[2])));
        assert!(!aufbau.sitzung.audio_verarbeiten(Bytes::from_static(&[3])));

        aufbau.sitzung.stoppen();
        aufbau.sitzung.beendet().await;
        assert_eq!(aufbau.aufzeichnung.audio.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nicht_verfuegbare_transkription_stoppt_und_meldet_fehler() {
        let aufbau = aufbauen(true, SessionConfig::default());
        let mut host = aufbau.verzeichnis.registrieren(uid("host"));

        warte_auf_status(&aufbau.sitzung, SessionStatus::Gestoppt).await;
        let nachricht = tokio::time::timeout(Duration::from_secs(2), host.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(nachricht.typ(), "error");
    }

    #[tokio::test]
    async fn sprache_setzen_bestaetigt_und_gilt_nur_fuer_gaeste() {
        let aufbau = aufbauen(false, SessionConfig::default());
        let mut gast = aufbau.verzeichnis.registrieren(uid("gast"));

        aufbau.sitzung.sprache_setzen(&uid("gast"), " fr ").unwrap();
        assert_eq!(aufbau.sitzung.sprache_von(&uid("gast")).as_deref(), Some("fr"));
        assert_eq!(
            gast.rx.recv().await.unwrap().payload,
            ServerPayload::LanguageConfirmed {
                language: "fr".into()
            }
        );

        assert!(aufbau.sitzung.sprache_setzen(&uid("host"), "de").is_err());
        assert!(aufbau.sitzung.sprache_setzen(&uid("fremd"), "de").is_err());

        aufbau.sitzung.sprache_setzen(&uid("gast"), "").unwrap();
        assert!(aufbau.sitzung.sprache_von(&uid("gast")).is_none());
    }

    #[tokio::test]
    async fn ehemalige_gaeste_bekommen_keine_uebersetzung() {
        let aufbau = aufbauen(false, SessionConfig::default());
        let _gast = aufbau.verzeichnis.registrieren(uid("gast"));
        aufbau.sitzung.sprache_setzen(&uid("gast"), "fr").unwrap();

        aufbau.verzeichnis.registry().raum_verlassen(&uid("gast"));
        let handles = aufbau.sitzung.endtranskript_empfangen("hello", 0.9);
        assert!(handles.is_empty());
        assert!(aufbau.sitzung.sprache_von(&uid("gast")).is_none());
    }
}
