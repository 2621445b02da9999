use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_sessions::Session;

use crate::{
    db::RoomId,
    store::SqliteGateway,
    sync::{RoomSession, SyncContext, SyncError},
    AppResult, Client,
};

use super::msg::{self, ClientIntent, ServerMessage};

type LiveRoom = Arc<RoomSession<SqliteGateway>>;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    /// Admin token handed out at room creation, adopted by a browser that
    /// has none yet.
    admin: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<RoomId>,
    Query(WsQuery { admin }): Query<WsQuery>,
    State(sync): State<SyncContext<SqliteGateway>>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let client = Client::load(session, admin.as_deref()).await?;
    let room = match RoomSession::open(&sync, room_id, Some(client.token), Some(client.history)).await {
        Ok(room) => Some(Arc::new(room)),
        Err(SyncError::RoomNotFound) => None,
        Err(err) => return Err(err.into()),
    };

    Ok(ws
        .on_upgrade(async move |mut stream| match room {
            Some(room) => serve(stream, room).await,
            None => {
                if let Some(msg) = ServerMessage::RoomNotFound.to_ws() {
                    let _ = stream.send(msg).await;
                }
            }
        })
        .into_response())
}

async fn serve(stream: WebSocket, room: LiveRoom) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let viewed = room.clone();
    let mut changes = room.watch();
    let mut send_task = tokio::spawn(async move {
        let mut next = viewed.view().map(ServerMessage::View);
        loop {
            if let Some(msg) = next.take().as_ref().and_then(ServerMessage::to_ws) {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
            next = tokio::select! {
                changed = changes.changed() => match changed {
                    Ok(()) => viewed.view().map(ServerMessage::View),
                    Err(_) => break,
                },
                msg = rx.recv() => match msg {
                    Some(msg) => Some(msg),
                    None => break,
                },
            };
        }
    });

    let mut recv_task = tokio::spawn({
        let room = room.clone();
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let intent = match serde_json::from_str::<ClientIntent>(text.as_str()) {
                    Ok(intent) => intent,
                    Err(err) => {
                        let _ = tx.send(ServerMessage::error(format!("unreadable message: {err}")));
                        continue;
                    }
                };

                // a slow write must not hold up the next message
                let (room, tx) = (room.clone(), tx.clone());
                tokio::spawn(async move {
                    if let Some(reply) = msg::dispatch(&room, intent).await {
                        let _ = tx.send(reply);
                    }
                    if let Some(view) = room.view() {
                        let _ = tx.send(ServerMessage::View(view));
                    }
                });
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };
    room.leave();
    tracing::debug!(room_id = %room.room_id(), "room socket closed");
}
