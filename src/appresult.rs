use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

use crate::db::MediaKind;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("this void is full")]
    RoomFull,
    #[error("the nickname {0:?} is already taken in this void")]
    NicknameTaken(String),
    #[error("{kind} files must be smaller than {limit} bytes")]
    PayloadTooLarge { kind: MediaKind, limit: usize },
    #[error("permission denied")]
    NoPermission,
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
    #[error("deletion stopped at {step} after {completed} completed steps: {source}")]
    PartialFailure {
        step: &'static str,
        completed: usize,
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        use AppError::*;
        match self {
            Validation(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            RoomFull | NicknameTaken(_) => StatusCode::CONFLICT,
            PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            NoPermission => StatusCode::FORBIDDEN,
            StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            PartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        use AppError::*;
        match self {
            Validation(_) => "VALIDATION",
            NotFound(_) => "NOT_FOUND",
            RoomFull => "ROOM_FULL",
            NicknameTaken(_) => "NICKNAME_TAKEN",
            PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            NoPermission => "NO_PERMISSION",
            StoreUnavailable(_) => "STORE_UNAVAILABLE",
            PartialFailure { .. } => "PARTIAL_FAILURE",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::StoreUnavailable(e) = &self {
            tracing::error!("store unavailable: {e}\n{}", e.backtrace());
        }
        (
            self.status_code(),
            Json(json!({ "error": self.to_string(), "code": self.error_code() })),
        )
            .into_response()
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::StoreUnavailable(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(sqlx::Error);
apperr_impl!(reqwest::Error);
apperr_impl!(std::io::Error);
apperr_impl!(serde_json::Error);
apperr_impl!(tower_sessions::session::Error);
