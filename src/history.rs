use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    db::RoomId,
    session::{ClientStore, StoreError, RECENT_ROOMS},
};

pub const MAX_RECENT_ROOMS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomHistoryItem {
    pub room_id: RoomId,
    pub is_admin: bool,
    /// Unix milliseconds.
    pub last_joined: i64,
    pub participant_name: Option<String>,
    pub room_name: Option<String>,
}

/// Most recently visited rooms for one participant token, newest first.
#[derive(Clone)]
pub struct RoomHistory {
    store: Arc<dyn ClientStore>,
    key: String,
}

impl RoomHistory {
    pub fn new(store: Arc<dyn ClientStore>, participant_id: &str) -> Self {
        Self {
            store,
            key: format!("{RECENT_ROOMS}:{participant_id}"),
        }
    }

    pub async fn list(&self) -> Result<Vec<RoomHistoryItem>, StoreError> {
        let Some(stored) = self.store.load(&self.key).await? else {
            return Ok(Vec::new());
        };
        let mut rooms: Vec<RoomHistoryItem> = match serde_json::from_value(stored) {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable room history, starting over");
                return Ok(Vec::new());
            }
        };
        rooms.sort_by(|a, b| b.last_joined.cmp(&a.last_joined));
        Ok(rooms)
    }

    pub async fn record_visit(
        &self,
        room_id: RoomId,
        is_admin: bool,
        participant_name: Option<&str>,
        room_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut rooms = self.list().await?;
        rooms.retain(|room| room.room_id != room_id);
        rooms.insert(0, RoomHistoryItem {
            room_id,
            is_admin,
            last_joined: now_millis(),
            participant_name: participant_name.map(str::to_owned),
            room_name: room_name.map(str::to_owned),
        });
        rooms.truncate(MAX_RECENT_ROOMS);
        self.write(&rooms).await
    }

    pub async fn update_room_name(&self, room_id: RoomId, room_name: &str) -> Result<(), StoreError> {
        let mut rooms = self.list().await?;
        let Some(room) = rooms.iter_mut().find(|room| room.room_id == room_id) else {
            return Ok(());
        };
        room.room_name = Some(room_name.to_owned());
        self.write(&rooms).await
    }

    pub async fn remove(&self, room_id: RoomId) -> Result<(), StoreError> {
        let mut rooms = self.list().await?;
        rooms.retain(|room| room.room_id != room_id);
        self.write(&rooms).await
    }

    async fn write(&self, rooms: &[RoomHistoryItem]) -> Result<(), StoreError> {
        self.store.save(&self.key, serde_json::to_value(rooms)?).await
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
