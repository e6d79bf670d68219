use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::engine::BookingError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Never leak driver messages to clients
        let message = match &self {
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal server error".to_string()
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(_) | BookingError::NotBookableDate(_) => {
                AppError::BadRequest(err.to_string())
            }
            BookingError::RouteNotFound(_) | BookingError::BookingNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            BookingError::RouteInactive(_)
            | BookingError::DuplicateBooking { .. }
            | BookingError::CapacityExceeded { .. }
            | BookingError::ConcurrencyConflict { .. }
            | BookingError::InvalidTransition { .. }
            | BookingError::PaymentRefMismatch { .. }
            | BookingError::SweepAlreadyRunning => AppError::Conflict(err.to_string()),
            BookingError::PricingNotConfigured { .. } => AppError::Unprocessable(err.to_string()),
            BookingError::Store(inner) => AppError::Internal(inner.to_string()),
        }
    }
}
