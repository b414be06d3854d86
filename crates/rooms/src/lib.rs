//! dolmetscher-rooms – Raum-Registry
//!
//! Verwaltet den ephemeren Zustand aller Raeume: wer ist Host, welche Gaeste
//! sind Mitglied, wann war jeder Teilnehmer zuletzt aktiv. Reiner
//! In-Memory-Zustand ohne I/O.
//!
//! ## Invarianten
//! - Jeder Benutzer ist hoechstens in einem Raum (Reverse-Index `user -> code`)
//! - Der Host ist nie Gast im eigenen Raum
//! - `|gaeste| <= max_teilnehmer`
//! - Ein deaktivierter Raum wird nie wieder aktiv
//!
//! ## Locking
//! Jeder Raum hat ein eigenes Mutex. Ein Index-Eintrag `user -> R` wird nur
//! eingefuegt oder entfernt, waehrend das Mutex von `R` gehalten wird
//! (Ausnahme: der Host-Eintrag beim Erstellen, bevor `R` sichtbar ist). Es
//! wird nie mehr als ein Raum-Mutex gleichzeitig gehalten.

pub mod error;
pub mod registry;
pub mod room;

pub use error::{RoomError, RoomResult};
pub use registry::{
    Beitritt, DeactivatedRoom, EvictedGuest, LeaveOutcome, RegistryConfig, RoomRegistry,
    SweepReport, VerlassenerRaum,
};
pub use room::Room;
