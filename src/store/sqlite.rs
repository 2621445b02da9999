use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::{normalize_name, Participant, Room, RoomId, Vote},
    feed::{ChangeFeed, ChangeNotice, ChangeOp, EntityKind},
    sync::VoteValue,
};

use super::{GatewayError, GatewayResult, RoomChanges, RoomGateway};

const ROOM_COLUMNS: &str = "id,admin_id,votes_revealed,room_name,created_at";
const PARTICIPANT_COLUMNS: &str = "id,room_id,participant_id,name,joined_at";
const VOTE_COLUMNS: &str = "id,room_id,participant_id,vote_value,voted_at";

/// Gateway over the sqlite store. Every successful write is announced on the
/// change feed.
#[derive(Clone)]
pub struct SqliteGateway {
    db_pool: SqlitePool,
    feed: ChangeFeed,
}

#[derive(FromRow)]
struct VoteRow {
    id: Uuid,
    room_id: Uuid,
    participant_id: String,
    vote_value: Option<String>,
    voted_at: OffsetDateTime,
}

impl From<VoteRow> for Vote {
    fn from(row: VoteRow) -> Self {
        Vote {
            id: row.id,
            room_id: row.room_id,
            participant_id: row.participant_id,
            value: VoteValue::from_wire(row.vote_value.as_deref()),
            voted_at: row.voted_at,
        }
    }
}

impl SqliteGateway {
    pub fn new(db_pool: SqlitePool, feed: ChangeFeed) -> Self {
        Self { db_pool, feed }
    }

    pub fn db_pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    fn notify(&self, room_id: RoomId, entity: EntityKind, op: ChangeOp) {
        self.feed.publish(ChangeNotice { room_id, entity, op });
    }

    /// Upserts keep the existing row id, so a fresh id coming back means insert.
    fn upsert_op(new_id: Uuid, returned_id: Uuid) -> ChangeOp {
        if new_id == returned_id { ChangeOp::Insert } else { ChangeOp::Update }
    }
}

impl RoomGateway for SqliteGateway {
    async fn create_room(&self, admin_id: &str, room_name: Option<&str>) -> GatewayResult<Room> {
        let room: Room = sqlx::query_as(&format!(
            "INSERT INTO rooms ({ROOM_COLUMNS}) VALUES (?,?,0,?,?) RETURNING {ROOM_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(admin_id)
        .bind(room_name)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db_pool)
        .await?;

        self.notify(room.id, EntityKind::Room, ChangeOp::Insert);
        Ok(room)
    }

    async fn fetch_room(&self, room_id: RoomId) -> GatewayResult<Room> {
        sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(GatewayError::NotFound)
    }

    async fn fetch_participants(&self, room_id: RoomId) -> GatewayResult<Vec<Participant>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE room_id=? ORDER BY joined_at ASC, rowid ASC"
        ))
        .bind(room_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    async fn fetch_votes(&self, room_id: RoomId) -> GatewayResult<Vec<Vote>> {
        let rows: Vec<VoteRow> = sqlx::query_as(&format!("SELECT {VOTE_COLUMNS} FROM votes WHERE room_id=?"))
            .bind(room_id)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(Vote::from).collect())
    }

    async fn upsert_participant(&self, room_id: RoomId, participant_id: &str, name: &str) -> GatewayResult<Participant> {
        let name = normalize_name(name)?;
        let id = Uuid::now_v7();
        let participant: Participant = sqlx::query_as(&format!(
            "INSERT INTO participants ({PARTICIPANT_COLUMNS}) VALUES (?,?,?,?,?) \
             ON CONFLICT (room_id, participant_id) DO UPDATE SET name=excluded.name \
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(id)
        .bind(room_id)
        .bind(participant_id)
        .bind(name)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db_pool)
        .await?;

        self.notify(room_id, EntityKind::Participant, Self::upsert_op(id, participant.id));
        Ok(participant)
    }

    async fn rename_participant(&self, room_id: RoomId, participant_id: &str, name: &str) -> GatewayResult<Participant> {
        let name = normalize_name(name)?;
        let participant: Participant = sqlx::query_as(&format!(
            "UPDATE participants SET name=? WHERE room_id=? AND participant_id=? RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(name)
        .bind(room_id)
        .bind(participant_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(GatewayError::NotFound)?;

        self.notify(room_id, EntityKind::Participant, ChangeOp::Update);
        Ok(participant)
    }

    async fn upsert_vote(&self, room_id: RoomId, participant_id: &str, value: &VoteValue) -> GatewayResult<Vote> {
        let id = Uuid::now_v7();
        let row: VoteRow = sqlx::query_as(&format!(
            "INSERT INTO votes ({VOTE_COLUMNS}) VALUES (?,?,?,?,?) \
             ON CONFLICT (room_id, participant_id) DO UPDATE SET vote_value=excluded.vote_value, voted_at=excluded.voted_at \
             RETURNING {VOTE_COLUMNS}"
        ))
        .bind(id)
        .bind(room_id)
        .bind(participant_id)
        .bind(value.as_wire())
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db_pool)
        .await?;

        self.notify(room_id, EntityKind::Vote, Self::upsert_op(id, row.id));
        Ok(row.into())
    }

    async fn set_room_fields(&self, room_id: RoomId, changes: RoomChanges) -> GatewayResult<Room> {
        if changes == RoomChanges::default() {
            return self.fetch_room(room_id).await;
        }

        let room: Room = sqlx::query_as(&format!(
            "UPDATE rooms SET votes_revealed=COALESCE(?, votes_revealed), room_name=COALESCE(?, room_name) \
             WHERE id=? RETURNING {ROOM_COLUMNS}"
        ))
        .bind(changes.votes_revealed)
        .bind(changes.room_name)
        .bind(room_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(GatewayError::NotFound)?;

        self.notify(room_id, EntityKind::Room, ChangeOp::Update);
        Ok(room)
    }

    async fn delete_participant(&self, room_id: RoomId, participant_id: &str) -> GatewayResult<()> {
        let result = sqlx::query("DELETE FROM participants WHERE room_id=? AND participant_id=?")
            .bind(room_id)
            .bind(participant_id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() > 0 {
            self.notify(room_id, EntityKind::Participant, ChangeOp::Delete);
            // the vote row goes with it through the foreign key
            self.notify(room_id, EntityKind::Vote, ChangeOp::Delete);
        }
        Ok(())
    }

    async fn delete_votes_for_participant(&self, room_id: RoomId, participant_id: &str) -> GatewayResult<()> {
        let result = sqlx::query("DELETE FROM votes WHERE room_id=? AND participant_id=?")
            .bind(room_id)
            .bind(participant_id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() > 0 {
            self.notify(room_id, EntityKind::Vote, ChangeOp::Delete);
        }
        Ok(())
    }

    async fn delete_all_votes(&self, room_id: RoomId) -> GatewayResult<()> {
        let result = sqlx::query("DELETE FROM votes WHERE room_id=?")
            .bind(room_id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() > 0 {
            self.notify(room_id, EntityKind::Vote, ChangeOp::Delete);
        }
        Ok(())
    }
}
