use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::signal::{IntakeError, SignalError};

/// Shape of an error response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBody {
    /// `{"error": message}`
    Error,
    /// `{"status": "error", "message": message}`
    Status,
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            body: ErrorBody::Error,
        }
    }

    /// Body could not be read at all; reported like any other handler fault.
    pub fn unreadable(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            body: ErrorBody::Error,
        }
    }

    pub fn trade_failed(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            body: ErrorBody::Status,
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Invalid(e @ (SignalError::InvalidJson(_) | SignalError::NotAnObject)) => {
                ApiError::unreadable(e.to_string())
            }
            IntakeError::Invalid(e) => ApiError::bad_request(e.to_string()),
            IntakeError::Trade(e) => ApiError::trade_failed(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.body {
            ErrorBody::Error => json!({ "error": self.message }),
            ErrorBody::Status => json!({ "status": "error", "message": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API Error {}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}
