mod msg;
mod new;
mod room;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use msg::{dispatch, ClientIntent, ServerMessage};
pub use new::{local_room_name, RoomNamer};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/{room_id}", get(room::room))
        .route("/{room_id}/ws", get(ws::room_ws))
}
