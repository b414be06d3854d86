//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Sie wird nur angenommen wenn der Benutzer Mitglied eines
//! aktiven Raums ist.
//!
//! ## Ablauf
//! ```text
//! Upgrade -> Raum pruefen -> Verzeichnis registrieren -> Schleife -> Cleanup
//!                              |
//!                              +-- Host: Sitzung starten, Raum informieren
//!                              +-- Gast: Teilnehmerzahl an den Raum
//! ```
//!
//! ## Keepalive
//! - Ohne eingehende Nachricht sendet der Server nach `keepalive_sek` einen Ping
//! - Nach `verbindungs_timeout_sek` ohne Nachricht wird getrennt
//! - Jeder eingehende Frame zaehlt als Lebenszeichen fuer die Registry
//!
//! Beim Trennen bleibt die Raum-Mitgliedschaft bestehen; entfernt wird erst
//! durch den Liveness-Sweeper.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_protocol::{HostStatus, ServerMessage};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::dispatcher::MessageDispatcher;
use crate::server_state::SignalingState;
use crate::session::SessionCoordinator;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    user_id: UserId,
}

/// Warum die Schleife verlassen wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trennung {
    Client,
    Timeout,
    Ersetzt,
    Sendefehler,
    Shutdown,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, user_id: UserId) -> Self {
        Self { state, user_id }
    }

    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal eingeht
    pub async fn verarbeiten(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let user_id = self.user_id.clone();

        let raum = match self.state.registry.raum_von_user(&user_id) {
            Some(r) if r.ist_aktiv => r,
            _ => {
                tracing::info!(user_id = %user_id, "Verbindung abgelehnt – kein aktiver Raum");
                let _ = senden(&mut sink, &ServerMessage::error("Nicht in einem aktiven Raum")).await;
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        };
        let code = raum.code.clone();
        let ist_host = raum.host_id == user_id;

        let registrierung = self.state.verzeichnis.registrieren(user_id.clone());
        let verbindungs_id = registrierung.verbindungs_id;
        let mut sende_rx = registrierung.rx;
        self.state.registry.aktivitaet_melden(&user_id);

        let sitzung = if ist_host {
            let sitzung = self.state.sitzung_starten(code.clone(), user_id.clone());
            self.state.verzeichnis.an_raum_senden(
                &code,
                ServerMessage::host_status(HostStatus::Connected),
                Some(&user_id),
            );
            Some(sitzung)
        } else {
            let anzahl = self
                .state
                .registry
                .raum(&code)
                .map(|r| r.teilnehmer_anzahl())
                .unwrap_or(0);
            self.state
                .verzeichnis
                .an_raum_senden(&code, ServerMessage::participant_count(anzahl), None);
            None
        };

        tracing::info!(user_id = %user_id, room = %code, host = ist_host, "WebSocket verbunden");

        let begruessung = if ist_host {
            format!("Verbunden mit Raum {code} als Host")
        } else {
            format!("Verbunden mit Raum {code}")
        };
        let _ = self
            .state
            .verzeichnis
            .an_user_senden(&user_id, ServerMessage::status(begruessung));

        let grund = self
            .schleife(&mut sink, &mut stream, &mut sende_rx, sitzung.as_ref())
            .await;

        let _ = sink.send(Message::Close(None)).await;
        self.aufraeumen(&code, verbindungs_id, sitzung, grund);
    }

    async fn schleife(
        &self,
        sink: &mut SplitSink<WebSocket, Message>,
        stream: &mut futures_util::stream::SplitStream<WebSocket>,
        sende_rx: &mut tokio::sync::mpsc::Receiver<ServerMessage>,
        sitzung: Option<&Arc<SessionCoordinator>>,
    ) -> Trennung {
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
        let mut shutdown_rx: watch::Receiver<bool> = self.state.shutdown_empfaenger();
        if *shutdown_rx.borrow() {
            return Trennung::Shutdown;
        }

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        loop {
            let jetzt = Instant::now();
            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(user_id = %self.user_id, "Verbindungs-Timeout");
                return Trennung::Timeout;
            }
            let ping_verzoegerung = naechster_ping
                .checked_duration_since(jetzt)
                .unwrap_or(Duration::from_millis(1));

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = stream.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            tracing::warn!(user_id = %self.user_id, fehler = %e, "WebSocket-Lesefehler");
                            return Trennung::Client;
                        }
                        None => return Trennung::Client,
                    };
                    letzter_empfang = Instant::now();
                    naechster_ping = letzter_empfang + keepalive_intervall;
                    self.state.registry.aktivitaet_melden(&self.user_id);

                    match frame {
                        Message::Text(text) => {
                            if let Some(antwort) = dispatcher.verarbeiten(&self.user_id, &text) {
                                if senden(sink, &antwort).await.is_err() {
                                    return Trennung::Sendefehler;
                                }
                            }
                        }
                        Message::Binary(daten) => match sitzung {
                            Some(sitzung) => {
                                sitzung.audio_verarbeiten(Bytes::from(daten));
                            }
                            None => {
                                tracing::debug!(user_id = %self.user_id, "Audio von Gast ignoriert");
                            }
                        },
                        Message::Close(_) => return Trennung::Client,
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }

                // Ausgehende Nachricht aus dem Verzeichnis
                ausgehend = sende_rx.recv() => {
                    match ausgehend {
                        Some(nachricht) => {
                            if senden(sink, &nachricht).await.is_err() {
                                return Trennung::Sendefehler;
                            }
                        }
                        None => return Trennung::Ersetzt,
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        if senden(sink, &ServerMessage::ping()).await.is_err() {
                            return Trennung::Sendefehler;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = senden(sink, &ServerMessage::status("Server wird heruntergefahren")).await;
                        return Trennung::Shutdown;
                    }
                }
            }
        }
    }

    /// Meldet nur die eigene Verbindung ab; eine neuere bleibt unberuehrt
    fn aufraeumen(
        &self,
        code: &RoomCode,
        verbindungs_id: uuid::Uuid,
        sitzung: Option<Arc<SessionCoordinator>>,
        grund: Trennung,
    ) {
        let eigene = self
            .state
            .verzeichnis
            .abmelden_verbindung(&self.user_id, verbindungs_id);

        if let Some(sitzung) = sitzung {
            self.state.sitzung_beenden(code, Some(&sitzung));
            let raum_aktiv = self.state.registry.raum(code).is_some_and(|r| r.ist_aktiv);
            if eigene && raum_aktiv {
                self.state.verzeichnis.an_raum_senden(
                    code,
                    ServerMessage::host_status(HostStatus::Disconnected),
                    Some(&self.user_id),
                );
            }
        }

        tracing::info!(
            user_id = %self.user_id,
            room = %code,
            grund = ?grund,
            "Verbindungs-Task beendet"
        );
    }
}

async fn senden(
    sink: &mut SplitSink<WebSocket, Message>,
    nachricht: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match nachricht.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(typ = nachricht.typ(), "Serialisierung fehlgeschlagen: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(json)).await
}
