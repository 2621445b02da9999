pub mod appresult;
pub mod cache;
pub mod config;
pub mod db;
pub mod feed;
pub mod history;
pub mod identity;
pub mod index;
pub mod rooms;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::extract::FromRef;
use tower_sessions::Session;

pub use appresult::{AppError, AppResult};

use crate::{
    history::RoomHistory,
    identity::{ensure_participant_token, ParticipantToken},
    rooms::RoomNamer,
    session::{ClientStore, SessionClientStore},
    store::SqliteGateway,
    sync::SyncContext,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub sync: SyncContext<SqliteGateway>,
    pub namer: RoomNamer,
}

/// The calling browser's durable state: its participant token and the
/// recent-rooms history kept under it.
pub struct Client {
    pub token: ParticipantToken,
    pub history: RoomHistory,
}

impl Client {
    pub async fn load(session: Session, bootstrap: Option<&str>) -> AppResult<Self> {
        let store: Arc<dyn ClientStore> = Arc::new(SessionClientStore(session));
        let token = ensure_participant_token(store.as_ref(), bootstrap).await?;
        Ok(Self {
            history: RoomHistory::new(store, &token),
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use tower_sessions::MemoryStore;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn history_written_from_a_socket_survives_into_the_next_request() {
        let sessions = Arc::new(MemoryStore::default());
        let upgrade = Session::new(None, sessions.clone(), None);
        let client = Client::load(upgrade.clone(), Some("T1")).await.unwrap();
        // the upgrade response leaves through the session layer
        upgrade.save().await.unwrap();
        let id = upgrade.id().unwrap();

        let room_id = Uuid::now_v7();
        client.history.record_visit(room_id, true, Some("Ann"), Some("quiet-otter")).await.unwrap();
        client.history.update_room_name(room_id, "loud-otter").await.unwrap();

        let next = Client::load(Session::new(Some(id), sessions, None), None).await.unwrap();
        assert_eq!(next.token, "T1");
        let rooms = next.history.list().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, room_id);
        assert_eq!(rooms[0].room_name.as_deref(), Some("loud-otter"));
    }
}
