use axum::extract::ws::{Message, Utf8Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    appresult::sync_status,
    store::RoomGateway,
    sync::{PendingRemoval, RoomSession, RoomView},
};

/// What the browser asks for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientIntent {
    Join { name: String },
    Vote { value: String },
    ToggleReveal,
    ResetVotes,
    RemoveParticipant { participant_id: String },
    ConfirmRemoval { participant_id: String, confirmed: bool },
    RenameRoom { name: String },
    RenameParticipant { participant_id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    View(RoomView),
    /// Ask the acting user to confirm a removal.
    ConfirmRemoval(PendingRemoval),
    Celebrate,
    Error { message: String },
    RoomNotFound,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    pub fn to_ws(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(Utf8Bytes::from(json))),
            Err(err) => {
                tracing::error!(error = %err, "could not encode server message");
                None
            }
        }
    }
}

/// Runs one intent against the session and returns the reply for the
/// acting browser, if any.
pub async fn dispatch<G: RoomGateway>(session: &RoomSession<G>, intent: ClientIntent) -> Option<ServerMessage> {
    let result = match intent {
        ClientIntent::Join { name } => session.join(&name).await.map(|_| None),
        ClientIntent::Vote { value } => session.cast_card(&value).await.map(|()| None),
        ClientIntent::ToggleReveal => session
            .toggle_reveal()
            .await
            .map(|outcome| outcome.celebrate.then_some(ServerMessage::Celebrate)),
        ClientIntent::ResetVotes => session.reset_votes().await.map(|()| None),
        ClientIntent::RemoveParticipant { participant_id } => session
            .request_removal(&participant_id)
            .map(|pending| Some(ServerMessage::ConfirmRemoval(pending))),
        ClientIntent::ConfirmRemoval { participant_id, confirmed } => {
            session.confirm_removal(&participant_id, confirmed).await.map(|_| None)
        }
        ClientIntent::RenameRoom { name } => session.rename_room(&name).await.map(|_| None),
        ClientIntent::RenameParticipant { participant_id, name } => {
            session.rename_participant(&participant_id, &name).await.map(|_| None)
        }
    };

    result.unwrap_or_else(|err| {
        if sync_status(&err).is_server_error() {
            tracing::warn!(room_id = %session.room_id(), error = %err, "room action failed");
        } else {
            tracing::debug!(room_id = %session.room_id(), error = %err, "room action rejected");
        }
        Some(ServerMessage::error(err.to_string()))
    })
}
