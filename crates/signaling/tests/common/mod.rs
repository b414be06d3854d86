//! Gemeinsame Fakes fuer die Integrationstests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dolmetscher_core::UserId;
use dolmetscher_protocol::{ServerMessage, ServerPayload};
use dolmetscher_rooms::{RegistryConfig, RoomRegistry};
use dolmetscher_signaling::{SignalingConfig, SignalingState};
use dolmetscher_speech::{
    AudioSink, SpeechError, SpeechResult, TranscriptEvent, TranscriptionBackend, Translator,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WARTEZEIT: Duration = Duration::from_secs(2);

pub fn uid(name: &str) -> UserId {
    UserId::from(name)
}

// ---------------------------------------------------------------------------
// Transkription: der Test steuert die Ereignisse selbst
// ---------------------------------------------------------------------------

/// Gibt den Ereignis-Sender jeder geoeffneten Sitzung an den Test weiter
pub struct GesteuertesBackend {
    sitzungen: mpsc::UnboundedSender<mpsc::Sender<TranscriptEvent>>,
}

impl GesteuertesBackend {
    pub fn neu() -> (Self, mpsc::UnboundedReceiver<mpsc::Sender<TranscriptEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sitzungen: tx }, rx)
    }
}

struct VerwerfenderSink;

#[async_trait]
impl AudioSink for VerwerfenderSink {
    async fn audio_senden(&mut self, _chunk: Bytes) -> SpeechResult<()> {
        Ok(())
    }

    async fn schliessen(&mut self) -> SpeechResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TranscriptionBackend for GesteuertesBackend {
    async fn sitzung_oeffnen(
        &self,
        ereignisse: mpsc::Sender<TranscriptEvent>,
    ) -> SpeechResult<Box<dyn AudioSink>> {
        self.sitzungen
            .send(ereignisse)
            .map_err(|_| SpeechError::SitzungGeschlossen)?;
        Ok(Box::new(VerwerfenderSink))
    }
}

// ---------------------------------------------------------------------------
// Uebersetzung: zaehlt Aufrufe, bestimmte Sprachen schlagen fehl
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ZaehlenderUebersetzer {
    aufrufe: Mutex<HashMap<String, usize>>,
    fehlerhafte_sprachen: Vec<String>,
}

impl ZaehlenderUebersetzer {
    pub fn mit_fehlern(sprachen: &[&str]) -> Self {
        Self {
            aufrufe: Mutex::default(),
            fehlerhafte_sprachen: sprachen.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn aufrufe(&self, sprache: &str) -> usize {
        self.aufrufe
            .lock()
            .unwrap()
            .get(sprache)
            .copied()
            .unwrap_or(0)
    }

    pub fn aufrufe_gesamt(&self) -> usize {
        self.aufrufe.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Translator for ZaehlenderUebersetzer {
    async fn uebersetzen(&self, text: &str, zielsprache: &str) -> SpeechResult<String> {
        *self
            .aufrufe
            .lock()
            .unwrap()
            .entry(zielsprache.to_string())
            .or_default() += 1;
        if self.fehlerhafte_sprachen.iter().any(|s| s == zielsprache) {
            return Err(SpeechError::Api {
                status: 503,
                nachricht: "nicht verfuegbar".into(),
            });
        }
        Ok(format!("[{zielsprache}] {text}"))
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

pub struct Testumgebung {
    pub state: Arc<SignalingState>,
    pub uebersetzer: Arc<ZaehlenderUebersetzer>,
    pub sitzungen: mpsc::UnboundedReceiver<mpsc::Sender<TranscriptEvent>>,
}

pub fn umgebung(uebersetzer: ZaehlenderUebersetzer) -> Testumgebung {
    umgebung_mit(RegistryConfig::default(), uebersetzer)
}

pub fn umgebung_mit(config: RegistryConfig, uebersetzer: ZaehlenderUebersetzer) -> Testumgebung {
    let (backend, sitzungen) = GesteuertesBackend::neu();
    let uebersetzer = Arc::new(uebersetzer);
    let state = SignalingState::neu(
        SignalingConfig::default(),
        RoomRegistry::neu(config),
        Arc::new(backend),
        Arc::clone(&uebersetzer) as Arc<dyn Translator>,
        None,
    );
    Testumgebung {
        state,
        uebersetzer,
        sitzungen,
    }
}

/// Naechste Nachricht oder Panic nach `WARTEZEIT`
pub async fn naechste(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerPayload {
    tokio::time::timeout(WARTEZEIT, rx.recv())
        .await
        .expect("keine Nachricht innerhalb der Wartezeit")
        .expect("Queue geschlossen")
        .payload
}

/// Alle bereits wartenden Nachrichten verwerfen
pub fn leeren(rx: &mut mpsc::Receiver<ServerMessage>) {
    while rx.try_recv().is_ok() {}
}
