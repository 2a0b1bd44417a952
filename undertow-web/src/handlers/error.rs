//! Mapping of cache errors onto HTTP responses.

use axum::Json;
use axum::http::header::CONTENT_RANGE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use undertow_core::{MagnetError, ProgressError, RegistryError, StreamError};

/// Error returned by every handler.
///
/// Only produced before any body byte is written; failures during streaming
/// close the connection instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Magnet(#[from] MagnetError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("Bad request: {reason}")]
    BadRequest { reason: String },
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Magnet(_) | ApiError::Progress(_) | ApiError::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Registry(RegistryError::OpenTimeout { .. }) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Registry(RegistryError::OpenError { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Registry(RegistryError::EngineUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Stream(StreamError::NoPlayableFile | StreamError::FileNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Stream(StreamError::RangeNotSatisfiable { .. }) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            ApiError::Stream(StreamError::StreamRead { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Magnet(_) => "InvalidContentId",
            ApiError::Registry(RegistryError::OpenTimeout { .. }) => "OpenTimeout",
            ApiError::Registry(RegistryError::OpenError { .. }) => "OpenError",
            ApiError::Registry(RegistryError::EngineUnavailable) => "EngineUnavailable",
            ApiError::Stream(StreamError::NoPlayableFile) => "NoPlayableFile",
            ApiError::Stream(StreamError::FileNotFound { .. }) => "FileNotFound",
            ApiError::Stream(StreamError::RangeNotSatisfiable { .. }) => "RangeNotSatisfiable",
            ApiError::Stream(StreamError::StreamRead { .. }) => "StreamReadError",
            ApiError::Progress(_) => "InvalidProgress",
            ApiError::BadRequest { .. } => "BadRequest",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({}): {}", status, self.kind(), self);
        } else {
            tracing::debug!("{} ({}): {}", status, self.kind(), self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        let mut response = (status, body).into_response();

        if let ApiError::Stream(StreamError::RangeNotSatisfiable { total }) = &self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
        response
    }
}
