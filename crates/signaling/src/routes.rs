//! Route-Definitionen fuer Raum-API und WebSocket

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::server_state::SignalingState;

/// Erstellt den Router fuer `/api/rooms/...` und `/ws/...`
pub fn signaling_router(state: Arc<SignalingState>) -> Router {
    Router::new()
        // Raeume
        .route(
            "/api/rooms/create/:user_id",
            post(handlers::rooms::create_room),
        )
        .route(
            "/api/rooms/join/:room_code/:user_id",
            post(handlers::rooms::join_room),
        )
        .route("/api/rooms/leave/:user_id", post(handlers::rooms::leave_room))
        .route("/api/rooms/:room_code", get(handlers::rooms::get_room))
        // WebSocket
        .route("/ws/:user_id", get(handlers::ws::ws_upgrade))
        .with_state(state)
}
