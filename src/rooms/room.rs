use axum::{debug_handler, extract::{Path, State}, response::{IntoResponse, Response}, Json};
use tower_sessions::Session;

use crate::{
    db::RoomId,
    store::SqliteGateway,
    sync::{RoomSession, SyncContext, SyncError},
    AppResult, Client,
};

/// The room as this browser would see it right now, without staying subscribed.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(sync): State<SyncContext<SqliteGateway>>,
    session: Session,
    Path(room_id): Path<RoomId>,
) -> AppResult<Response> {
    let client = Client::load(session, None).await?;
    let room = RoomSession::open(&sync, room_id, Some(client.token), Some(client.history)).await?;
    let view = room.view().ok_or(SyncError::RoomNotFound)?;
    Ok(Json(view).into_response())
}
