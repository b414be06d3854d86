//! Aufbau der Sprachdienste
//!
//! Fehlt ein API-Key, laeuft der Server trotzdem: Raeume und Verbindungen
//! funktionieren, jede Transkription bzw. Uebersetzung schlaegt mit einer
//! Fehlermeldung an die Clients fehl und `/health` meldet `degraded`.

use async_trait::async_trait;
use dolmetscher_speech::{
    AudioSink, OpenAiTranslator, SpeechError, SpeechResult, TranscriptEvent,
    TranscriptionBackend, Translator, WhisperBackend,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ServerConfig;

/// Platzhalter fuer einen nicht konfigurierten Dienst
pub struct NichtKonfiguriert(pub &'static str);

#[async_trait]
impl TranscriptionBackend for NichtKonfiguriert {
    async fn sitzung_oeffnen(
        &self,
        _ereignisse: mpsc::Sender<TranscriptEvent>,
    ) -> SpeechResult<Box<dyn AudioSink>> {
        Err(SpeechError::NichtKonfiguriert(self.0.into()))
    }
}

#[async_trait]
impl Translator for NichtKonfiguriert {
    async fn uebersetzen(&self, _text: &str, _zielsprache: &str) -> SpeechResult<String> {
        Err(SpeechError::NichtKonfiguriert(self.0.into()))
    }
}

pub struct Sprachdienste {
    pub transkription: Arc<dyn TranscriptionBackend>,
    pub uebersetzer: Arc<dyn Translator>,
    /// Beide Dienste haben einen API-Key
    pub konfiguriert: bool,
}

impl Sprachdienste {
    pub fn aus_config(config: &ServerConfig, env_key: Option<&str>) -> Self {
        let mut konfiguriert = true;

        let transkription: Arc<dyn TranscriptionBackend> =
            match WhisperBackend::neu(config.whisper_config(env_key)) {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    tracing::warn!("Transkription deaktiviert: {}", e);
                    konfiguriert = false;
                    Arc::new(NichtKonfiguriert("Transkription"))
                }
            };

        let uebersetzer: Arc<dyn Translator> =
            match OpenAiTranslator::neu(config.translator_config(env_key)) {
                Ok(uebersetzer) => Arc::new(uebersetzer),
                Err(e) => {
                    tracing::warn!("Uebersetzung deaktiviert: {}", e);
                    konfiguriert = false;
                    Arc::new(NichtKonfiguriert("Uebersetzung"))
                }
            };

        Self {
            transkription,
            uebersetzer,
            konfiguriert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohne_api_key_nicht_konfiguriert() {
        let dienste = Sprachdienste::aus_config(&ServerConfig::default(), None);
        assert!(!dienste.konfiguriert);
    }

    #[test]
    fn mit_api_key_konfiguriert() {
        let dienste = Sprachdienste::aus_config(&ServerConfig::default(), Some("sk-test"));
        assert!(dienste.konfiguriert);
    }

    #[tokio::test]
    async fn platzhalter_liefert_fehler() {
        let dienst = NichtKonfiguriert("Uebersetzung");
        assert!(matches!(
            dienst.uebersetzen("hallo", "fr").await,
            Err(SpeechError::NichtKonfiguriert(_))
        ));
    }
}
