//! Control-Protokoll (WebSocket)
//!
//! Definiert alle JSON-Events die ueber die WebSocket-Verbindung zwischen
//! Client und Server ausgetauscht werden.
//!
//! ## Design
//! - Jede Server-Nachricht hat einen `type`-Diskriminator und einen `timestamp`
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - Client-Nachrichten tragen nur `type` (+ Nutzdaten)

use chrono::{DateTime, Utc};
use dolmetscher_core::UserId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Verbindungszustand des Hosts aus Sicht der Gaeste
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Host-WebSocket ist verbunden, Transkription laeuft
    Connected,
    /// Host-WebSocket wurde getrennt (Raum bleibt bis zur Liveness-Frist bestehen)
    Disconnected,
    /// Host hat den Raum verlassen, Raum ist geschlossen
    Left,
    /// Host wurde wegen Inaktivitaet entfernt, Raum ist geschlossen
    Timeout,
}

/// Nutzdaten einer Server-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPayload {
    /// Vorlaeufiger, noch revidierbarer Transkript-Abschnitt
    Partial { text: String },
    /// Stabilisierter Transkript-Abschnitt
    Final { text: String, confidence: f64 },
    /// Uebersetzung eines finalen Abschnitts fuer genau einen Gast
    Translation {
        text: String,
        original_text: String,
        language: String,
    },
    Status { text: String },
    Error { text: String },
    HostStatus { status: HostStatus },
    UserLeft { user_id: UserId },
    ParticipantCount { count: usize },
    LanguageConfirmed { language: String },
    Ping,
    Pong,
}

/// Vollstaendige Server-Nachricht inklusive Zeitstempel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(flatten)]
    pub payload: ServerPayload,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    /// Verpackt Nutzdaten mit dem aktuellen Zeitstempel
    pub fn neu(payload: ServerPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self::neu(ServerPayload::Partial { text: text.into() })
    }

    pub fn final_text(text: impl Into<String>, confidence: f64) -> Self {
        Self::neu(ServerPayload::Final {
            text: text.into(),
            confidence,
        })
    }

    pub fn translation(
        text: impl Into<String>,
        original_text: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self::neu(ServerPayload::Translation {
            text: text.into(),
            original_text: original_text.into(),
            language: language.into(),
        })
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::neu(ServerPayload::Status { text: text.into() })
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::neu(ServerPayload::Error { text: text.into() })
    }

    pub fn host_status(status: HostStatus) -> Self {
        Self::neu(ServerPayload::HostStatus { status })
    }

    pub fn user_left(user_id: UserId) -> Self {
        Self::neu(ServerPayload::UserLeft { user_id })
    }

    pub fn participant_count(count: usize) -> Self {
        Self::neu(ServerPayload::ParticipantCount { count })
    }

    pub fn language_confirmed(language: impl Into<String>) -> Self {
        Self::neu(ServerPayload::LanguageConfirmed {
            language: language.into(),
        })
    }

    pub fn ping() -> Self {
        Self::neu(ServerPayload::Ping)
    }

    pub fn pong() -> Self {
        Self::neu(ServerPayload::Pong)
    }

    /// Kurzname des Nachrichtentyps (fuer Logs und Metriken)
    pub fn typ(&self) -> &'static str {
        match self.payload {
            ServerPayload::Partial { .. } => "partial",
            ServerPayload::Final { .. } => "final",
            ServerPayload::Translation { .. } => "translation",
            ServerPayload::Status { .. } => "status",
            ServerPayload::Error { .. } => "error",
            ServerPayload::HostStatus { .. } => "host_status",
            ServerPayload::UserLeft { .. } => "user_left",
            ServerPayload::ParticipantCount { .. } => "participant_count",
            ServerPayload::LanguageConfirmed { .. } => "language_confirmed",
            ServerPayload::Ping => "ping",
            ServerPayload::Pong => "pong",
        }
    }

    /// Serialisiert die Nachricht als JSON-Text-Frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// JSON-Nachrichten die ein Gast (oder Host) senden kann
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive, wird mit `pong` beantwortet
    Ping,
    /// Antwort auf einen Server-Ping
    Pong,
    /// Gewuenschte Zielsprache fuer Uebersetzungen
    LanguagePreference { language: String },
}

impl ClientMessage {
    /// Parst einen Text-Frame
    pub fn aus_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn als_json(nachricht: &ServerMessage) -> Value {
        serde_json::to_value(nachricht).unwrap()
    }

    #[test]
    fn translation_traegt_typ_und_zeitstempel() {
        let json = als_json(&ServerMessage::translation("bonjour", "hello", "fr"));
        assert_eq!(json["type"], "translation");
        assert_eq!(json["text"], "bonjour");
        assert_eq!(json["original_text"], "hello");
        assert_eq!(json["language"], "fr");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn host_status_klein_geschrieben() {
        let json = als_json(&ServerMessage::host_status(HostStatus::Disconnected));
        assert_eq!(json["type"], "host_status");
        assert_eq!(json["status"], "disconnected");
    }

    #[test]
    fn ping_hat_nur_typ_und_zeitstempel() {
        let json = als_json(&ServerMessage::ping());
        let objekt = json.as_object().unwrap();
        assert_eq!(objekt.len(), 2);
        assert_eq!(json["type"], "ping");
    }

    #[test]
    fn participant_count_und_user_left() {
        let json = als_json(&ServerMessage::participant_count(2));
        assert_eq!(json["type"], "participant_count");
        assert_eq!(json["count"], 2);

        let json = als_json(&ServerMessage::user_left(UserId::from("gast")));
        assert_eq!(json["user_id"], "gast");
    }

    #[test]
    fn client_nachrichten_parsen() {
        assert_eq!(
            ClientMessage::aus_json(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            ClientMessage::aus_json(r#"{"type":"language_preference","language":"de"}"#).unwrap(),
            ClientMessage::LanguagePreference {
                language: "de".into()
            }
        );
    }

    #[test]
    fn unbekannter_client_typ_ist_fehler() {
        assert!(ClientMessage::aus_json(r#"{"type":"explode"}"#).is_err());
        assert!(ClientMessage::aus_json("kein json").is_err());
    }

    #[test]
    fn typ_namen_passen_zum_json() {
        let nachricht = ServerMessage::language_confirmed("fr");
        assert_eq!(als_json(&nachricht)["type"], nachricht.typ());
    }
}
