//! dolmetscher-signaling – Verteilung von Transkripten und Uebersetzungen
//!
//! Dieser Crate verbindet die Raum-Registry mit den WebSocket-Clients. Er
//! verwaltet die Verbindungen, die Host-Sitzungen (Audio -> Transkription
//! -> Uebersetzung) und entfernt inaktive Teilnehmer.
//!
//! ## Architektur
//!
//! ```text
//! Axum-Router (routes)
//!     |
//!     +-- REST /api/rooms/...   -> RoomRegistry
//!     +-- WS   /ws/{user_id}    -> ClientConnection (pro Verbindung ein Task)
//!                                    |
//!                                    +-- MessageDispatcher (ping, Sprachwahl)
//!                                    +-- SessionCoordinator (nur Host: Audio)
//!
//! ConnectionDirectory – UserId -> Send-Queue, Unicast und Raum-Broadcast
//! LivenessSweeper     – periodische Bereinigung inaktiver Teilnehmer
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server_state;
pub mod session;
pub mod sweeper;

// Bequeme Re-Exporte
pub use broadcast::{ConnectionDirectory, Registrierung, ZustellBericht};
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use routes::signaling_router;
pub use server_state::{SignalingConfig, SignalingState};
pub use session::{SessionConfig, SessionCoordinator, SessionKontext, SessionStatus};
pub use sweeper::{LivenessSweeper, SweeperConfig};
