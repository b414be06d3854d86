//! dolmetscher-protocol – Nachrichtenformate
//!
//! Alle Nachrichten werden als JSON uebertragen:
//! - `control`: WebSocket-Events (Server -> Client und Client -> Server)
//! - `rest`: Request/Response-Bodies der Raum-API
//!
//! Audio vom Host wird nicht als JSON, sondern als binaerer
//! WebSocket-Frame (16 kHz mono PCM, s16le) uebertragen.

pub mod control;
pub mod rest;

pub use control::{ClientMessage, HostStatus, ServerMessage, ServerPayload};
pub use rest::{ErrorBody, ErrorResponse, RoomCreatedResponse, RoomInfo, RoomJoinedResponse};
