//! Byte-range streaming of torrent files.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::RANGE;
use axum::response::Response;
use undertow_core::MagnetLink;

use super::ApiError;
use crate::server::AppState;

/// `GET /stream/{content_id}`: streams the largest playable file.
///
/// # Errors
///
/// - Any error of [`stream_file`]
pub async fn stream_default_file(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_stream(&state, &content_id, None, &headers).await
}

/// `GET /stream/{content_id}/{file_index}`: streams one file by index.
///
/// # Errors
///
/// - `ApiError::BadRequest` / `ApiError::Magnet` - Unparsable index or content id (400)
/// - `ApiError::Registry` - Engine could not be opened (408/500/503)
/// - `ApiError::Stream` - No such file (404), bad range (416), read failure (500)
pub async fn stream_file(
    State(state): State<AppState>,
    Path((content_id, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_index = file_index
        .parse::<usize>()
        .map_err(|_| ApiError::BadRequest {
            reason: format!("file index {file_index:?} is not a non-negative integer"),
        })?;
    serve_stream(&state, &content_id, Some(file_index), &headers).await
}

async fn serve_stream(
    state: &AppState,
    content_id: &str,
    file_index: Option<usize>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let magnet = MagnetLink::resolve(content_id)?;
    let range = headers.get(RANGE).and_then(|value| value.to_str().ok());

    tracing::debug!(
        "Stream request for {} file {:?} range {:?}",
        magnet.content_id().short(),
        file_index,
        range
    );

    let entry = state.registry.get_or_create(&magnet).await?;
    let response = state.streamer.stream(entry, file_index, range).await?;
    Ok(response)
}
