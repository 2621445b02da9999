use thiserror::Error;

use crate::{db::MAX_NAME_LEN, store::GatewayError};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no participant token is known for this browser")]
    NoIdentity,
    #[error("room not found")]
    RoomNotFound,
    #[error("name is required")]
    NameEmpty,
    #[error("name must be {MAX_NAME_LEN} characters or less")]
    NameTooLong,
    #[error("already in this room, refresh the page")]
    NameConflict,
    #[error("join the room first")]
    NotJoined,
    #[error("only the room admin can do that")]
    NotAdmin,
    #[error("you cannot remove yourself")]
    CannotRemoveSelf,
    #[error("no such participant in this room")]
    UnknownParticipant,
    #[error("no removal is waiting for confirmation")]
    NoPendingRemoval,
    #[error("invalid vote {0:?}")]
    InvalidVote(String),
    #[error("reset incomplete (votes cleared: {votes_cleared}, reveal cleared: {hidden}), reset again")]
    ResetIncomplete { votes_cleared: bool, hidden: bool },
    #[error("could not remove participant: {0}")]
    RemoveFailed(#[source] GatewayError),
    #[error(transparent)]
    Gateway(GatewayError),
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NameEmpty => Self::NameEmpty,
            GatewayError::NameTooLong => Self::NameTooLong,
            GatewayError::Conflict => Self::NameConflict,
            err => Self::Gateway(err),
        }
    }
}
