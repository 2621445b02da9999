mod sqlite;

use std::future::Future;

use thiserror::Error;

use crate::{db::{NAME_LENGTH_CHECK, Participant, Room, RoomId, Vote, MAX_NAME_LEN}, sync::VoteValue};

pub use sqlite::SqliteGateway;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("row not found")]
    NotFound,
    #[error("name is required")]
    NameEmpty,
    #[error("name must be {MAX_NAME_LEN} characters or less")]
    NameTooLong,
    #[error("row already exists")]
    Conflict,
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => return Self::NotFound,
            sqlx::Error::Database(db) => {
                if db.message().contains(NAME_LENGTH_CHECK) {
                    return Self::NameTooLong;
                }
                if db.is_unique_violation() {
                    return Self::Conflict;
                }
                if db.is_foreign_key_violation() {
                    return Self::Rejected(db.message().to_owned());
                }
            }
            _ => {}
        }
        Self::Database(err)
    }
}

/// Fields of a room the admin may change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomChanges {
    pub votes_revealed: Option<bool>,
    pub room_name: Option<String>,
}

impl RoomChanges {
    pub fn revealed(votes_revealed: bool) -> Self {
        Self { votes_revealed: Some(votes_revealed), ..Self::default() }
    }

    pub fn renamed(room_name: impl Into<String>) -> Self {
        Self { room_name: Some(room_name.into()), ..Self::default() }
    }
}

/// Row-level access to rooms, participants and votes. Every call is an
/// independent round trip; nothing here spans a transaction.
pub trait RoomGateway: Send + Sync + 'static {
    fn create_room(&self, admin_id: &str, room_name: Option<&str>) -> impl Future<Output = GatewayResult<Room>> + Send;

    fn fetch_room(&self, room_id: RoomId) -> impl Future<Output = GatewayResult<Room>> + Send;

    /// Ordered by join time.
    fn fetch_participants(&self, room_id: RoomId) -> impl Future<Output = GatewayResult<Vec<Participant>>> + Send;

    fn fetch_votes(&self, room_id: RoomId) -> impl Future<Output = GatewayResult<Vec<Vote>>> + Send;

    /// Insert-or-update keyed by `(room_id, participant_id)`.
    fn upsert_participant(
        &self,
        room_id: RoomId,
        participant_id: &str,
        name: &str,
    ) -> impl Future<Output = GatewayResult<Participant>> + Send;

    fn rename_participant(
        &self,
        room_id: RoomId,
        participant_id: &str,
        name: &str,
    ) -> impl Future<Output = GatewayResult<Participant>> + Send;

    /// Insert-or-update keyed by `(room_id, participant_id)`.
    fn upsert_vote(
        &self,
        room_id: RoomId,
        participant_id: &str,
        value: &VoteValue,
    ) -> impl Future<Output = GatewayResult<Vote>> + Send;

    fn set_room_fields(&self, room_id: RoomId, changes: RoomChanges) -> impl Future<Output = GatewayResult<Room>> + Send;

    fn delete_participant(&self, room_id: RoomId, participant_id: &str) -> impl Future<Output = GatewayResult<()>> + Send;

    fn delete_votes_for_participant(
        &self,
        room_id: RoomId,
        participant_id: &str,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    fn delete_all_votes(&self, room_id: RoomId) -> impl Future<Output = GatewayResult<()>> + Send;
}
