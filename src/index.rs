use axum::{debug_handler, extract::Path, http::StatusCode, response::{IntoResponse, Response}, Json};
use tower_sessions::Session;

use crate::{db::RoomId, AppResult, Client};

/// Recent rooms of the calling browser, newest first.
#[debug_handler]
pub async fn index(session: Session) -> AppResult<Response> {
    let client = Client::load(session, None).await?;
    let rooms = client.history.list().await?;
    Ok(Json(rooms).into_response())
}

#[debug_handler]
pub async fn forget_room(session: Session, Path(room_id): Path<RoomId>) -> AppResult<Response> {
    let client = Client::load(session, None).await?;
    client.history.remove(room_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
