//! WebSocket-Upgrade fuer `/ws/{user_id}`

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
};
use dolmetscher_core::UserId;
use std::sync::Arc;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// `GET /ws/{user_id}` – die Raum-Pruefung erfolgt nach dem Upgrade
pub async fn ws_upgrade(
    State(state): State<Arc<SignalingState>>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let verbindung = ClientConnection::neu(state, UserId::neu(user_id));
    ws.on_upgrade(move |socket| verbindung.verarbeiten(socket))
}
