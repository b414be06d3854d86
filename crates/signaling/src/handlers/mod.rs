//! HTTP-Handler fuer Raum-API und WebSocket-Upgrade
//!
//! Alle Handler bekommen den gemeinsamen `SignalingState` als Axum-State.

pub mod rooms;
pub mod ws;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use dolmetscher_protocol::ErrorResponse;

use crate::error::SignalingError;

/// Fehler als `{ "error": { "code", "message" } }` mit passendem Status
pub fn fehler_antwort(fehler: &SignalingError) -> Response {
    let code = fehler.http_status();
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::neu(status.as_u16(), fehler.to_string()))).into_response()
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        fehler_antwort(&self)
    }
}
