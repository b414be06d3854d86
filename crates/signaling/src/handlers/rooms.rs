//! REST-Handler fuer Raum-Endpunkte (`/api/rooms/...`)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use dolmetscher_core::{RoomCode, UserId};
use dolmetscher_protocol::{RoomCreatedResponse, RoomInfo, RoomJoinedResponse};
use dolmetscher_rooms::RoomError;
use std::sync::Arc;

use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// `POST /api/rooms/create/{user_id}`
pub async fn create_room(
    State(state): State<Arc<SignalingState>>,
    Path(user_id): Path<String>,
) -> Result<Response, SignalingError> {
    let raum = state.registry.raum_erstellen(UserId::neu(user_id))?;
    state.raum_metrik_aktualisieren();
    tracing::info!(room = %raum.code, host = %raum.host_id, "Raum erstellt");

    let antwort = RoomCreatedResponse {
        room_code: raum.code,
        created_at: raum.erstellt_am,
    };
    Ok((StatusCode::CREATED, Json(antwort)).into_response())
}

/// `POST /api/rooms/join/{room_code}/{user_id}`
pub async fn join_room(
    State(state): State<Arc<SignalingState>>,
    Path((room_code, user_id)): Path<(String, String)>,
) -> Result<Json<RoomJoinedResponse>, SignalingError> {
    let code = RoomCode::normalisiert(&room_code);
    let user_id = UserId::neu(user_id);

    let beitritt = state.registry.beitreten(&code, user_id.clone())?;
    if let Some(verlassen) = beitritt.verlassen.as_ref().filter(|v| v.code != code) {
        state.raumwechsel_melden(&user_id, verlassen);
    }
    let raum = beitritt.raum;

    tracing::info!(room = %raum.code, user_id = %user_id, "Raum beigetreten");

    Ok(Json(RoomJoinedResponse {
        room_code: raum.code.clone(),
        host_id: raum.host_id.clone(),
        participant_count: raum.teilnehmer_anzahl(),
    }))
}

/// `POST /api/rooms/leave/{user_id}`
pub async fn leave_room(
    State(state): State<Arc<SignalingState>>,
    Path(user_id): Path<String>,
) -> StatusCode {
    let user_id = UserId::neu(user_id);
    let ergebnis = state.verlassen_und_melden(&user_id);
    tracing::info!(user_id = %user_id, ergebnis = ?ergebnis, "Raum verlassen");
    StatusCode::NO_CONTENT
}

/// `GET /api/rooms/{room_code}`
pub async fn get_room(
    State(state): State<Arc<SignalingState>>,
    Path(room_code): Path<String>,
) -> Result<Json<RoomInfo>, SignalingError> {
    let code = RoomCode::normalisiert(&room_code);
    let raum = state
        .registry
        .raum(&code)
        .ok_or(RoomError::RaumNichtGefunden(code))?;

    Ok(Json(RoomInfo {
        room_code: raum.code.clone(),
        host_id: raum.host_id.clone(),
        guest_count: raum.gaeste.len(),
        max_participants: raum.max_teilnehmer,
        is_active: raum.ist_aktiv,
        created_at: raum.erstellt_am,
    }))
}
