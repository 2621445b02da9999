use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{store::{GatewayError, GatewayResult}, sync::VoteValue};

pub type RoomId = Uuid;

/// Longest display name a participant may pick, counted in characters after trimming.
pub const MAX_NAME_LEN: usize = 20;

pub(crate) const NAME_LENGTH_CHECK: &str = "participants_name_length_check";

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Room {
    pub id: RoomId,
    pub admin_id: String,
    pub votes_revealed: bool,
    pub room_name: Option<String>,
    pub created_at: OffsetDateTime,

    // unique: id
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: RoomId,
    pub participant_id: String,
    pub name: String,
    pub joined_at: OffsetDateTime,

    // unique: room_id, participant_id
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub id: Uuid,
    pub room_id: RoomId,
    pub participant_id: String,
    pub value: VoteValue,
    pub voted_at: OffsetDateTime,

    // unique: room_id, participant_id
}

/// Trims a display name and checks it against the join rules.
pub fn normalize_name(name: &str) -> GatewayResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GatewayError::NameEmpty);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(GatewayError::NameTooLong);
    }
    Ok(name)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id BLOB PRIMARY KEY NOT NULL,
    admin_id TEXT NOT NULL,
    votes_revealed BOOLEAN NOT NULL DEFAULT 0,
    room_name TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    id BLOB PRIMARY KEY NOT NULL,
    room_id BLOB NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    participant_id TEXT NOT NULL,
    name TEXT NOT NULL
        CONSTRAINT participants_name_length_check CHECK (length(trim(name)) BETWEEN 1 AND 20),
    joined_at TEXT NOT NULL,
    UNIQUE (room_id, participant_id)
);

CREATE TABLE IF NOT EXISTS votes (
    id BLOB PRIMARY KEY NOT NULL,
    room_id BLOB NOT NULL,
    participant_id TEXT NOT NULL,
    vote_value TEXT,
    voted_at TEXT NOT NULL,
    UNIQUE (room_id, participant_id),
    FOREIGN KEY (room_id, participant_id)
        REFERENCES participants(room_id, participant_id) ON DELETE CASCADE
);
"#;

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_before_checking() {
        assert_eq!(normalize_name("  Ann  ").unwrap(), "Ann");
        assert!(matches!(normalize_name("   "), Err(GatewayError::NameEmpty)));
        assert!(matches!(normalize_name(&"x".repeat(21)), Err(GatewayError::NameTooLong)));
        assert_eq!(normalize_name(&format!(" {} ", "x".repeat(20))).unwrap().len(), 20);
    }

    #[test]
    fn name_length_counts_characters_not_bytes() {
        let name = "é".repeat(20);
        assert_eq!(normalize_name(&name).unwrap(), name);
    }
}
