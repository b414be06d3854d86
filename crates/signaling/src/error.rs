//! Fehlertypen fuer den Signaling-Service

use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_rooms::RoomError;
use dolmetscher_speech::SpeechError;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Abgelehnte Raum-Operation
    #[error(transparent)]
    Raum(#[from] RoomError),

    /// Fehler eines Sprachdienstes
    #[error("Sprachdienst: {0}")]
    Sprache(#[from] SpeechError),

    /// Benutzer hat keine registrierte Verbindung
    #[error("Benutzer nicht verbunden: {0}")]
    NichtVerbunden(UserId),

    /// Send-Queue des Clients ist voll
    #[error("Send-Queue voll: {0}")]
    QueueVoll(UserId),

    /// Verbindung wurde getrennt (Queue geschlossen)
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Fuer den Raum laeuft keine Host-Sitzung
    #[error("Keine aktive Host-Sitzung fuer Raum {0}")]
    KeineSitzung(RoomCode),

    /// Protokollfehler (ungueltiges Frame)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),
}

impl SignalingError {
    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// HTTP-Statuscode fuer REST-Antworten
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Raum(e) => e.http_status(),
            Self::Protokoll(_) => 400,
            Self::NichtVerbunden(_) | Self::KeineSitzung(_) => 404,
            Self::Sprache(_) => 502,
            Self::QueueVoll(_) | Self::VerbindungGetrennt => 500,
        }
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
