use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::{store::GatewayError, sync::SyncError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<SyncError>() {
            return sync_status(err);
        }
        if let Some(err) = self.0.downcast_ref::<GatewayError>() {
            return gateway_status(err);
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn sync_status(err: &SyncError) -> StatusCode {
    use SyncError::*;
    match err {
        RoomNotFound | UnknownParticipant => StatusCode::NOT_FOUND,
        NameEmpty | NameTooLong | InvalidVote(_) | NoPendingRemoval | CannotRemoveSelf => StatusCode::BAD_REQUEST,
        NoIdentity | NotJoined | NotAdmin => StatusCode::FORBIDDEN,
        NameConflict | ResetIncomplete { .. } => StatusCode::CONFLICT,
        RemoveFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Gateway(err) => gateway_status(err),
    }
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NotFound => StatusCode::NOT_FOUND,
        GatewayError::NameEmpty | GatewayError::NameTooLong => StatusCode::BAD_REQUEST,
        GatewayError::Conflict | GatewayError::Rejected(_) => StatusCode::CONFLICT,
        GatewayError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
