//! dolmetscher-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die Identifikationstypen bereit, die von allen
//! anderen Dolmetscher-Crates gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{RoomCode, UserId};
