//! Message-Dispatcher – Routet Client-Nachrichten
//!
//! Der Dispatcher empfaengt Text-Frames einer `ClientConnection`, parst sie
//! als `ClientMessage` und gibt eine direkte Antwort zurueck. Audio kommt
//! als Binaer-Frame und laeuft nicht ueber den Dispatcher.

use dolmetscher_core::UserId;
use dolmetscher_protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;

use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen eingehenden Text-Frame
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll
    /// (Pong, oder die Antwort laeuft ueber das Verbindungsverzeichnis).
    pub fn verarbeiten(&self, user_id: &UserId, text: &str) -> Option<ServerMessage> {
        let nachricht = match ClientMessage::aus_json(text) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(user_id = %user_id, fehler = %e, "Ungueltige Nachricht");
                return Some(ServerMessage::error(format!("Ungueltige Nachricht: {e}")));
            }
        };

        match nachricht {
            ClientMessage::Ping => Some(ServerMessage::pong()),
            ClientMessage::Pong => None,
            ClientMessage::LanguagePreference { language } => {
                match self.sprache_setzen(user_id, &language) {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::debug!(user_id = %user_id, fehler = %e, "Sprachwahl abgelehnt");
                        Some(ServerMessage::error(e.to_string()))
                    }
                }
            }
        }
    }

    /// Leitet die Sprachwahl an die Host-Sitzung des Raums weiter
    fn sprache_setzen(&self, user_id: &UserId, sprache: &str) -> Result<(), SignalingError> {
        let code = self
            .state
            .registry
            .raum_code_von(user_id)
            .ok_or_else(|| SignalingError::NichtVerbunden(user_id.clone()))?;
        let sitzung = self
            .state
            .sitzung(&code)
            .ok_or(SignalingError::KeineSitzung(code))?;
        sitzung.sprache_setzen(user_id, sprache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use async_trait::async_trait;
    use dolmetscher_rooms::RoomRegistry;
    use dolmetscher_speech::{
        AudioSink, SpeechResult, TranscriptEvent, TranscriptionBackend, Translator,
    };
    use dolmetscher_protocol::ServerPayload;
    use tokio::sync::mpsc;

    struct StillerSink;

    #[async_trait]
    impl AudioSink for StillerSink {
        async fn audio_senden(&mut self, _chunk: bytes::Bytes) -> SpeechResult<()> {
            Ok(())
        }

        async fn schliessen(&mut self) -> SpeechResult<()> {
            Ok(())
        }
    }

    struct StillesBackend;

    #[async_trait]
    impl TranscriptionBackend for StillesBackend {
        async fn sitzung_oeffnen(
            &self,
            _ereignisse: mpsc::Sender<TranscriptEvent>,
        ) -> SpeechResult<Box<dyn AudioSink>> {
            Ok(Box::new(StillerSink))
        }
    }

    struct Echo;

    #[async_trait]
    impl Translator for Echo {
        async fn uebersetzen(&self, text: &str, sprache: &str) -> SpeechResult<String> {
            Ok(format!("[{sprache}] {text}"))
        }
    }

    fn state() -> Arc<SignalingState> {
        SignalingState::neu(
            SignalingConfig::default(),
            RoomRegistry::default(),
            Arc::new(StillesBackend),
            Arc::new(Echo),
            None,
        )
    }

    fn uid(name: &str) -> UserId {
        UserId::neu(name)
    }

    #[tokio::test]
    async fn ping_wird_mit_pong_beantwortet() {
        let dispatcher = MessageDispatcher::neu(state());
        let antwort = dispatcher.verarbeiten(&uid("a"), r#"{"type":"ping"}"#);
        assert_eq!(antwort.map(|m| m.payload), Some(ServerPayload::Pong));
        assert!(dispatcher.verarbeiten(&uid("a"), r#"{"type":"pong"}"#).is_none());
    }

    #[tokio::test]
    async fn ungueltiges_json_ergibt_fehler() {
        let dispatcher = MessageDispatcher::neu(state());
        let antwort = dispatcher.verarbeiten(&uid("a"), "kein json");
        assert!(matches!(
            antwort.map(|m| m.payload),
            Some(ServerPayload::Error { .. })
        ));
    }

    #[tokio::test]
    async fn sprachwahl_ohne_host_sitzung_ergibt_fehler() {
        let state = state();
        let raum = state.registry.raum_erstellen(uid("host")).unwrap();
        state.registry.raum_beitreten(&raum.code, uid("gast")).unwrap();

        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        let antwort = dispatcher.verarbeiten(
            &uid("gast"),
            r#"{"type":"language_preference","language":"fr"}"#,
        );
        assert!(matches!(
            antwort.map(|m| m.payload),
            Some(ServerPayload::Error { .. })
        ));
    }

    #[tokio::test]
    async fn sprachwahl_wird_an_sitzung_weitergeleitet() {
        let state = state();
        let raum = state.registry.raum_erstellen(uid("host")).unwrap();
        state.registry.raum_beitreten(&raum.code, uid("gast")).unwrap();
        let sitzung = state.sitzung_starten(raum.code.clone(), uid("host"));
        let mut gast_rx = state.verzeichnis.registrieren(uid("gast")).rx;

        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        let antwort = dispatcher.verarbeiten(
            &uid("gast"),
            r#"{"type":"language_preference","language":"fr"}"#,
        );
        assert!(antwort.is_none());
        assert_eq!(sitzung.sprache_von(&uid("gast")).as_deref(), Some("fr"));
        let bestaetigung = gast_rx.recv().await.unwrap();
        assert_eq!(
            bestaetigung.payload,
            ServerPayload::LanguageConfirmed {
                language: "fr".into()
            }
        );
        sitzung.stoppen();
    }
}
