//! Fehlertypen der Raum-Registry
//!
//! Alle Varianten sind Validierungsfehler: der Aufrufer bekommt eine
//! abgelehnte Operation mit Begruendung, nie einen Absturz.

use dolmetscher_core::{RoomCode, UserId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(RoomCode),

    #[error("Raum ist nicht mehr aktiv: {0}")]
    RaumInaktiv(RoomCode),

    #[error("Raum ist voll: {0}")]
    RaumVoll(RoomCode),

    #[error("Benutzer ist bereits in einem Raum: {0}")]
    BereitsImRaum(UserId),
}

impl RoomError {
    /// HTTP-Statuscode fuer REST-Antworten (immer 4xx)
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RaumNichtGefunden(_) => 404,
            Self::RaumInaktiv(_) => 410,
            Self::RaumVoll(_) | Self::BereitsImRaum(_) => 409,
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
