//! Verbindungsverzeichnis – Send-Queues aller verbundenen Clients
//!
//! Haelt pro Benutzer genau einen Handle auf die Send-Queue seiner aktuellen
//! WebSocket-Verbindung. Raum-Mitgliedschaft wird bei jedem Broadcast ueber
//! die `RoomRegistry` aufgeloest.
//!
//! ## Zustellung
//! - An einen Benutzer: `an_user_senden` (Fehler wenn nicht zustellbar)
//! - An einen Raum: `an_raum_senden` (best effort, Fehler werden gesammelt)
//!
//! Wird ein Handle durch eine neuere Verbindung ersetzt, wird die alte Queue
//! geschlossen; die alte Verbindung beendet sich dadurch selbst.

use dashmap::DashMap;
use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_observability::DolmetscherMetrics;
use dolmetscher_protocol::ServerMessage;
use dolmetscher_rooms::RoomRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standardgroesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines verbundenen Clients
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub user_id: UserId,
    /// Unterscheidet aufeinanderfolgende Verbindungen desselben Benutzers
    pub verbindungs_id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientSender {
    /// Reiht eine Nachricht nicht-blockierend ein
    pub fn senden(&self, nachricht: ServerMessage) -> SignalingResult<()> {
        match self.tx.try_send(nachricht) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(user_id = %self.user_id, typ = n.typ(), "Send-Queue voll – Nachricht verworfen");
                Err(SignalingError::QueueVoll(self.user_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(user_id = %self.user_id, "Send-Queue geschlossen (Client getrennt)");
                Err(SignalingError::VerbindungGetrennt)
            }
        }
    }
}

/// Empfangsseite einer registrierten Verbindung
pub struct Registrierung {
    pub verbindungs_id: Uuid,
    pub rx: mpsc::Receiver<ServerMessage>,
}

/// Ergebnis eines Raum-Broadcasts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZustellBericht {
    /// Anzahl erfolgreich eingereihter Nachrichten
    pub zugestellt: usize,
    /// Verbundene Empfaenger bei denen das Einreihen fehlschlug
    pub fehlgeschlagen: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// ConnectionDirectory
// ---------------------------------------------------------------------------

/// Zentrales Verzeichnis aller verbundenen Clients
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ConnectionDirectory {
    inner: Arc<ConnectionDirectoryInner>,
}

struct ConnectionDirectoryInner {
    clients: DashMap<UserId, ClientSender>,
    registry: RoomRegistry,
    queue_groesse: usize,
    metriken: Option<DolmetscherMetrics>,
}

impl ConnectionDirectory {
    pub fn neu(registry: RoomRegistry) -> Self {
        Self::mit_optionen(registry, SEND_QUEUE_GROESSE, None)
    }

    pub fn mit_optionen(
        registry: RoomRegistry,
        queue_groesse: usize,
        metriken: Option<DolmetscherMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionDirectoryInner {
                clients: DashMap::new(),
                registry,
                queue_groesse: queue_groesse.max(1),
                metriken,
            }),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    /// Registriert eine neue Verbindung und gibt deren Empfangs-Queue zurueck
    ///
    /// Ein bestehender Handle desselben Benutzers wird ersetzt.
    pub fn registrieren(&self, user_id: UserId) -> Registrierung {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let verbindungs_id = Uuid::new_v4();
        let sender = ClientSender {
            user_id: user_id.clone(),
            verbindungs_id,
            tx,
        };

        if let Some(alt) = self.inner.clients.insert(user_id.clone(), sender) {
            tracing::info!(
                user_id = %user_id,
                alte_verbindung = %alt.verbindungs_id,
                "Bestehende Verbindung ersetzt"
            );
        }
        self.gauge_aktualisieren();
        tracing::debug!(user_id = %user_id, verbindung = %verbindungs_id, "Client registriert");

        Registrierung { verbindungs_id, rx }
    }

    /// Entfernt den Handle des Benutzers (egal welche Verbindung)
    pub fn abmelden(&self, user_id: &UserId) -> bool {
        let entfernt = self.inner.clients.remove(user_id).is_some();
        if entfernt {
            self.gauge_aktualisieren();
            tracing::debug!(user_id = %user_id, "Client abgemeldet");
        }
        entfernt
    }

    /// Entfernt den Handle nur, wenn er noch zu `verbindungs_id` gehoert
    ///
    /// Eine inzwischen ersetzte Verbindung meldet so nie die neuere ab.
    pub fn abmelden_verbindung(&self, user_id: &UserId, verbindungs_id: Uuid) -> bool {
        let entfernt = self
            .inner
            .clients
            .remove_if(user_id, |_, s| s.verbindungs_id == verbindungs_id)
            .is_some();
        if entfernt {
            self.gauge_aktualisieren();
            tracing::debug!(user_id = %user_id, verbindung = %verbindungs_id, "Client abgemeldet");
        }
        entfernt
    }

    /// Sendet eine Nachricht an einen einzelnen Client
    pub fn an_user_senden(&self, user_id: &UserId, nachricht: ServerMessage) -> SignalingResult<()> {
        let ergebnis = match self.inner.clients.get(user_id) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(user_id = %user_id, "Senden an nicht verbundenen Client");
                Err(SignalingError::NichtVerbunden(user_id.clone()))
            }
        };
        if ergebnis.is_err() {
            self.fehlschlag_zaehlen(1);
        }
        ergebnis
    }

    /// Sendet eine Nachricht an alle verbundenen Mitglieder eines Raums
    ///
    /// Mitglieder ohne Verbindung werden uebersprungen. Fehler bei einzelnen
    /// Empfaengern brechen die Verteilung nicht ab.
    pub fn an_raum_senden(
        &self,
        code: &RoomCode,
        nachricht: ServerMessage,
        ausgenommen: Option<&UserId>,
    ) -> ZustellBericht {
        let mut bericht = ZustellBericht::default();

        for mitglied in self.inner.registry.mitglieder(code) {
            if ausgenommen == Some(&mitglied) {
                continue;
            }
            let Some(sender) = self.inner.clients.get(&mitglied) else {
                continue;
            };
            match sender.senden(nachricht.clone()) {
                Ok(()) => bericht.zugestellt += 1,
                Err(_) => bericht.fehlgeschlagen.push(mitglied.clone()),
            }
        }

        if !bericht.fehlgeschlagen.is_empty() {
            tracing::debug!(
                room = %code,
                typ = nachricht.typ(),
                fehlgeschlagen = bericht.fehlgeschlagen.len(),
                "Broadcast teilweise fehlgeschlagen"
            );
            self.fehlschlag_zaehlen(bericht.fehlgeschlagen.len());
        }
        bericht
    }

    /// Gibt die Anzahl der registrierten Clients zurueck
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Prueft ob ein Client registriert ist
    pub fn ist_registriert(&self, user_id: &UserId) -> bool {
        self.inner.clients.contains_key(user_id)
    }

    fn gauge_aktualisieren(&self) {
        if let Some(m) = &self.inner.metriken {
            m.connected_clients.set(self.inner.clients.len() as f64);
        }
    }

    fn fehlschlag_zaehlen(&self, anzahl: usize) {
        if let Some(m) = &self.inner.metriken {
            m.failed_deliveries_total.inc_by(anzahl as u64);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dolmetscher_protocol::ServerPayload;

    fn uid(name: &str) -> UserId {
        UserId::from(name)
    }

    /// Raum mit Host und zwei Gaesten, alle verbunden
    fn raum_mit_gaesten() -> (
        ConnectionDirectory,
        RoomCode,
        Vec<mpsc::Receiver<ServerMessage>>,
    ) {
        let registry = RoomRegistry::default();
        let code = registry.raum_erstellen(uid("host")).unwrap().code;
        registry.raum_beitreten(&code, uid("g1")).unwrap();
        registry.raum_beitreten(&code, uid("g2")).unwrap();

        let verzeichnis = ConnectionDirectory::neu(registry);
        let empfaenger = ["host", "g1", "g2"]
            .iter()
            .map(|n| verzeichnis.registrieren(uid(n)).rx)
            .collect();
        (verzeichnis, code, empfaenger)
    }

    #[tokio::test]
    async fn registrieren_und_senden() {
        let verzeichnis = ConnectionDirectory::neu(RoomRegistry::default());
        let mut reg = verzeichnis.registrieren(uid("a"));
        assert!(verzeichnis.ist_registriert(&uid("a")));

        verzeichnis
            .an_user_senden(&uid("a"), ServerMessage::pong())
            .unwrap();
        let empfangen = reg.rx.try_recv().expect("Nachricht muss vorhanden sein");
        assert_eq!(empfangen.payload, ServerPayload::Pong);
    }

    #[test]
    fn senden_an_unbekannten_schlaegt_fehl() {
        let verzeichnis = ConnectionDirectory::neu(RoomRegistry::default());
        assert!(matches!(
            verzeichnis.an_user_senden(&uid("niemand"), ServerMessage::ping()),
            Err(SignalingError::NichtVerbunden(_))
        ));
    }

    #[tokio::test]
    async fn raum_broadcast_erreicht_alle_mitglieder() {
        let (verzeichnis, code, mut empfaenger) = raum_mit_gaesten();
        let bericht = verzeichnis.an_raum_senden(&code, ServerMessage::partial("hallo"), None);
        assert_eq!(bericht.zugestellt, 3);
        assert!(bericht.fehlgeschlagen.is_empty());
        for rx in &mut empfaenger {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn ausgenommener_empfaengt_nichts() {
        let (verzeichnis, code, mut empfaenger) = raum_mit_gaesten();
        let bericht = verzeichnis.an_raum_senden(
            &code,
            ServerMessage::user_left(uid("x")),
            Some(&uid("g1")),
        );
        assert_eq!(bericht.zugestellt, 2);
        assert!(empfaenger[0].try_recv().is_ok());
        assert!(empfaenger[1].try_recv().is_err(), "g1 ist ausgenommen");
        assert!(empfaenger[2].try_recv().is_ok());
    }

    #[tokio::test]
    async fn fehlschlag_eines_empfaengers_bricht_nicht_ab() {
        let (verzeichnis, code, mut empfaenger) = raum_mit_gaesten();
        // g1 trennt die Verbindung ohne sich abzumelden
        let rx_g1 = empfaenger.remove(1);
        drop(rx_g1);

        let bericht = verzeichnis.an_raum_senden(&code, ServerMessage::final_text("x", 0.9), None);
        assert_eq!(bericht.zugestellt, 2);
        assert_eq!(bericht.fehlgeschlagen, vec![uid("g1")]);
        assert!(empfaenger[0].try_recv().is_ok());
        assert!(empfaenger[1].try_recv().is_ok());
    }

    #[tokio::test]
    async fn nicht_verbundene_mitglieder_werden_uebersprungen() {
        let (verzeichnis, code, _empfaenger) = raum_mit_gaesten();
        verzeichnis.abmelden(&uid("g2"));
        let bericht = verzeichnis.an_raum_senden(&code, ServerMessage::ping(), None);
        assert_eq!(bericht.zugestellt, 2);
        assert!(bericht.fehlgeschlagen.is_empty());
    }

    #[tokio::test]
    async fn ersetzte_verbindung_wird_geschlossen() {
        let verzeichnis = ConnectionDirectory::neu(RoomRegistry::default());
        let mut alt = verzeichnis.registrieren(uid("a"));
        let mut neu = verzeichnis.registrieren(uid("a"));
        assert_eq!(verzeichnis.client_anzahl(), 1);

        // Alte Queue ist geschlossen
        assert!(alt.rx.recv().await.is_none());

        // Abmelden der alten Verbindung laesst die neue bestehen
        assert!(!verzeichnis.abmelden_verbindung(&uid("a"), alt.verbindungs_id));
        assert!(verzeichnis.ist_registriert(&uid("a")));

        verzeichnis.an_user_senden(&uid("a"), ServerMessage::ping()).unwrap();
        assert!(neu.rx.try_recv().is_ok());

        assert!(verzeichnis.abmelden_verbindung(&uid("a"), neu.verbindungs_id));
        assert!(!verzeichnis.ist_registriert(&uid("a")));
    }

    #[tokio::test]
    async fn volle_queue_meldet_fehler() {
        let verzeichnis =
            ConnectionDirectory::mit_optionen(RoomRegistry::default(), 1, None);
        let _reg = verzeichnis.registrieren(uid("a"));
        verzeichnis.an_user_senden(&uid("a"), ServerMessage::ping()).unwrap();
        assert!(matches!(
            verzeichnis.an_user_senden(&uid("a"), ServerMessage::ping()),
            Err(SignalingError::QueueVoll(_))
        ));
    }

    #[tokio::test]
    async fn metriken_zaehlen_clients_und_fehlschlaege() {
        let metriken = DolmetscherMetrics::neu().unwrap();
        let verzeichnis = ConnectionDirectory::mit_optionen(
            RoomRegistry::default(),
            4,
            Some(metriken.clone()),
        );
        let _a = verzeichnis.registrieren(uid("a"));
        let _b = verzeichnis.registrieren(uid("b"));
        assert_eq!(metriken.connected_clients.get(), 2.0);

        let _ = verzeichnis.an_user_senden(&uid("c"), ServerMessage::ping());
        assert_eq!(metriken.failed_deliveries_total.get(), 1);

        verzeichnis.abmelden(&uid("a"));
        assert_eq!(metriken.connected_clients.get(), 1.0);
    }
}
