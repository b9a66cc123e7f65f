//! Error responses.
//!
//! Every failure leaves the API as `{"success": false, "error": <kind>, "message": ...}`. The kind
//! is coarse on purpose; the full error chain only goes to the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scape_core::{UploadError, UploadErrorKind};
use serde::Serialize;
use utoipa::ToSchema;

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    pub success: bool,
    /// One of `invalid_input`, `storage_failure`, `orphan_commit`, `not_found`, `forbidden`,
    /// `unauthorized`.
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            message: message.into(),
        }
    }

    pub fn storage_failure() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "storage_failure",
            message: "Internal error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let (status, kind, message) = match err.kind() {
            UploadErrorKind::InvalidInput => {
                (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
            }
            UploadErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
            UploadErrorKind::Forbidden => (StatusCode::FORBIDDEN, "forbidden", err.to_string()),
            UploadErrorKind::StorageFailure => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_failure",
                "Internal error".to_string(),
            ),
            UploadErrorKind::OrphanCommit => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "orphan_commit",
                "Upload could not be recorded".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("{kind}: {err:?}");
        } else {
            tracing::debug!("{kind}: {err}");
        }

        Self {
            status,
            kind,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorRes {
            success: false,
            error: self.kind.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
