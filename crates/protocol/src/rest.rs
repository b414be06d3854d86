//! Request/Response-Bodies der Raum-API (`/api/rooms/...`)

use chrono::{DateTime, Utc};
use dolmetscher_core::{RoomCode, UserId};
use serde::{Deserialize, Serialize};

/// Antwort auf `POST /api/rooms/create/{user_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCreatedResponse {
    pub room_code: RoomCode,
    pub created_at: DateTime<Utc>,
}

/// Antwort auf `POST /api/rooms/join/{room_code}/{user_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinedResponse {
    pub room_code: RoomCode,
    pub host_id: UserId,
    /// Host + Gaeste
    pub participant_count: usize,
}

/// Antwort auf `GET /api/rooms/{room_code}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_code: RoomCode,
    pub host_id: UserId,
    pub guest_count: usize,
    pub max_participants: usize,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fehler-Body: `{ "error": { "code": 409, "message": "..." } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl ErrorResponse {
    pub fn neu(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_body_format() {
        let json = serde_json::to_value(ErrorResponse::neu(404, "Raum nicht gefunden")).unwrap();
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["message"], "Raum nicht gefunden");
    }

    #[test]
    fn beitritt_antwort_felder() {
        let antwort = RoomJoinedResponse {
            room_code: RoomCode("ABCDE".into()),
            host_id: UserId::from("host"),
            participant_count: 2,
        };
        let json = serde_json::to_value(antwort).unwrap();
        assert_eq!(json["room_code"], "ABCDE");
        assert_eq!(json["host_id"], "host");
        assert_eq!(json["participant_count"], 2);
    }
}
