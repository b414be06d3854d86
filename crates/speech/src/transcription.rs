//! Transkriptions-Schnittstelle
//!
//! Ein Backend oeffnet pro Host-Sitzung einen [`AudioSink`]. Ereignisse
//! (Partial/Final/Fehler) werden in der Reihenfolge ihres Entstehens in den
//! uebergebenen Channel geschrieben; der Empfaenger verarbeitet sie
//! sequentiell.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SpeechResult;

/// Ereignis des Transkriptionsdienstes
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Verbindung zum Dienst steht
    Geoeffnet,
    /// Vorlaeufiger Text, kann noch revidiert werden
    Partial(String),
    /// Stabilisierter Text
    Final { text: String, confidence: f64 },
    /// Fehler des Dienstes (Sitzung laeuft ggf. weiter)
    Fehler(String),
    /// Sitzung beendet, es folgen keine weiteren Ereignisse
    Geschlossen,
}

impl TranscriptEvent {
    /// Kurzname (fuer Logs und Metriken)
    pub fn art(&self) -> &'static str {
        match self {
            Self::Geoeffnet => "opened",
            Self::Partial(_) => "partial",
            Self::Final { .. } => "final",
            Self::Fehler(_) => "error",
            Self::Geschlossen => "closed",
        }
    }
}

/// Eingang einer offenen Transkriptions-Sitzung
#[async_trait]
pub trait AudioSink: Send {
    /// Reicht einen Audio-Chunk (16 kHz, mono, s16le) weiter
    async fn audio_senden(&mut self, chunk: Bytes) -> SpeechResult<()>;

    /// Schliesst die Sitzung; gepuffertes Audio wird noch verarbeitet
    async fn schliessen(&mut self) -> SpeechResult<()>;
}

/// Transkriptionsdienst
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Oeffnet eine neue Sitzung, Ereignisse gehen an `ereignisse`
    async fn sitzung_oeffnen(
        &self,
        ereignisse: mpsc::Sender<TranscriptEvent>,
    ) -> SpeechResult<Box<dyn AudioSink>>;
}
