use crate::services::object_store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        GatewayError::from(err).into()
    }
}

/// Failures of the streaming and upload controllers.
///
/// Only `Cancelled` is benign: the client is gone (or a timeout fired), so
/// nothing is reported beyond a debug line.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object `{key}` not found")]
    NotFound { key: String },

    #[error("requested range not satisfiable for an object of {size} bytes")]
    RangeUnsatisfiable { size: u64 },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    UploadRejected(#[from] UploadRejection),

    #[error("no files available for the requested archive")]
    NoFilesAvailable,

    #[error("request cancelled")]
    Cancelled,

    #[error("upstream storage failure: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn is_benign(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } | GatewayError::NoFilesAvailable => {
                StatusCode::NOT_FOUND
            }
            GatewayError::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::UploadRejected(rejection) => rejection.status(),
            // nginx's "client closed request"; nobody is listening anymore.
            GatewayError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => GatewayError::NotFound { key },
            StoreError::Cancelled => GatewayError::Cancelled,
            StoreError::InvalidKey(key) => {
                GatewayError::Validation(format!("invalid object key `{}`", key))
            }
            StoreError::Io(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                GatewayError::Cancelled
            }
            other => GatewayError::Upstream(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        if err.is_benign() {
            tracing::debug!("request abandoned: {}", err);
        } else if matches!(err, GatewayError::Upstream(_) | GatewayError::Internal(_)) {
            tracing::error!("{}", err);
        }
        AppError::new(err.status(), err.to_string())
    }
}

/// Why an upload was refused before anything was registered.
#[derive(Debug, Error)]
pub enum UploadRejection {
    #[error("missing upload directory: send the `{header}` header or a `{field}` form field")]
    MissingDirectory { header: String, field: String },

    #[error("file `{filename}` has extension `{extension}`; allowed extensions: {allowed}")]
    Extension {
        filename: String,
        extension: String,
        allowed: String,
    },

    #[error("file `{filename}` has type `{mime}`; allowed types: {allowed}")]
    MimeType {
        filename: String,
        mime: String,
        allowed: String,
    },

    #[error("file `{filename}` exceeds the maximum upload size of {limit} bytes")]
    TooLarge { filename: String, limit: u64 },

    #[error("unexpected file field `{0}`")]
    UnexpectedField(String),

    #[error("too many files in field `{field}` (at most {max})")]
    TooManyFiles { field: String, max: usize },

    #[error("no file was uploaded")]
    NoFile,

    #[error("malformed multipart body: {0}")]
    Malformed(String),
}

impl UploadRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadRejection::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadRejection::Extension { .. } | UploadRejection::MimeType { .. } => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancellation_is_benign() {
        assert!(GatewayError::Cancelled.is_benign());
        assert!(!GatewayError::Upstream("boom".into()).is_benign());
        assert!(!GatewayError::NotFound { key: "a".into() }.is_benign());
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let not_found: GatewayError = StoreError::NotFound("a.txt".into()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert!(not_found.to_string().contains("a.txt"));

        let interrupted: GatewayError =
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "x")).into();
        assert!(interrupted.is_benign());

        let broken: GatewayError = StoreError::Backend("disk on fire".into()).into();
        assert_eq!(broken.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upload_rejections_name_the_constraint() {
        let err: GatewayError = UploadRejection::TooLarge {
            filename: "big.bin".into(),
            limit: 1024,
        }
        .into();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(err.to_string().contains("maximum upload size"));
    }
}
