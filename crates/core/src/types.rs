//! Identifikationstypen fuer Dolmetscher
//!
//! Benutzer-IDs werden vom Client gewaehlt (z.B. `user_k3j9x0a2b`), Raum-Codes
//! vom Server vergeben. Beide sind Strings, das Newtype-Pattern schliesst
//! Verwechslungen zur Compilezeit aus.

use serde::{Deserialize, Serialize};

/// Identitaet eines Teilnehmers (Host oder Gast)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kurzer, teilbarer Raum-Code (z.B. `ABCDE`)
///
/// Codes werden immer in Grossbuchstaben gefuehrt; `normalisiert` wandelt
/// Benutzereingaben entsprechend um.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub String);

impl RoomCode {
    /// Erstellt einen Code aus einer Benutzereingabe (Whitespace entfernt, Grossbuchstaben)
    pub fn normalisiert(eingabe: &str) -> Self {
        Self(eingabe.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
