//! Fehlertypen der Sprachdienste

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// Netzwerk- oder Protokollfehler des HTTP-Clients
    #[error("HTTP-Fehler: {0}")]
    Http(#[from] reqwest::Error),

    /// Dienst hat mit einem Fehlerstatus geantwortet
    #[error("API-Fehler ({status}): {nachricht}")]
    Api { status: u16, nachricht: String },

    /// Antwort konnte nicht interpretiert werden
    #[error("Ungueltige Antwort: {0}")]
    UngueltigeAntwort(String),

    /// Audio-Sitzung ist bereits geschlossen
    #[error("Sitzung geschlossen")]
    SitzungGeschlossen,

    /// Dienst ist nicht konfiguriert (z.B. fehlender API-Key)
    #[error("Nicht konfiguriert: {0}")]
    NichtKonfiguriert(String),
}

impl SpeechError {
    pub fn ungueltige_antwort(msg: impl Into<String>) -> Self {
        Self::UngueltigeAntwort(msg.into())
    }
}

pub type SpeechResult<T> = Result<T, SpeechError>;
