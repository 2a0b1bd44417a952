//! Torrent metadata lookup.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use undertow_core::streaming::{content_type_for, is_playable, select_default_file};
use undertow_core::{ContentId, MagnetLink, SwarmProgress};

use super::ApiError;
use crate::server::AppState;

/// One file of the torrent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub length: u64,
    pub index: usize,
    pub playable: bool,
    pub content_type: Option<&'static str>,
}

/// Body of `GET /info/{content_id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub content_id: ContentId,
    /// Hex info-hash, absent for opaque content ids
    pub info_hash: Option<String>,
    pub name: String,
    pub total_length: u64,
    pub files: Vec<FileInfo>,
    /// File served by `/stream/{content_id}` without an index
    pub default_file_index: Option<usize>,
    pub progress: SwarmProgress,
    pub watch_fraction: f64,
    pub active_reads: usize,
}

/// Resolves (opening if needed) the engine and lists its files.
///
/// # Errors
///
/// - `ApiError::Magnet` - Unparsable content id (400)
/// - `ApiError::Registry` - Open timed out (408), failed (500) or no engine (503)
pub async fn info(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> Result<Json<InfoResponse>, ApiError> {
    let magnet = MagnetLink::resolve(&content_id)?;
    let entry = state.registry.get_or_create(&magnet).await?;
    let engine = entry.engine();

    let files = engine.files();
    let default_file_index = select_default_file(&files).map(|file| file.index);
    let content_id = entry.content_id().clone();

    Ok(Json(InfoResponse {
        info_hash: content_id
            .is_info_hash()
            .then(|| content_id.as_str().to_string()),
        content_id,
        name: engine.name(),
        total_length: engine.total_length(),
        files: files
            .into_iter()
            .map(|file| {
                let playable = is_playable(&file.name);
                FileInfo {
                    content_type: playable.then(|| content_type_for(&file.name)),
                    playable,
                    name: file.name,
                    length: file.length,
                    index: file.index,
                }
            })
            .collect(),
        default_file_index,
        progress: engine.progress(),
        watch_fraction: entry.watch_fraction(),
        active_reads: entry.active_reads(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::server::build_router;
    use crate::server::test_support::{movie_torrent, simulated_state};

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_info_lists_files_and_default() {
        let (state, swarm) = simulated_state();
        swarm.add_torrent(movie_torrent());

        let (status, body) = get_json(build_router(state), "/info/abc123").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Example Movie");
        assert_eq!(body["contentId"], "abc123");
        assert!(body["infoHash"].is_null());
        assert_eq!(body["totalLength"], 905 * 1024 * 1024);
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "sample.mp4");
        assert_eq!(files[1]["name"], "movie.mkv");
        assert_eq!(files[1]["contentType"], "video/x-matroska");
        assert_eq!(body["defaultFileIndex"], 1);
    }

    #[tokio::test]
    async fn test_info_rejects_invalid_content_id() {
        let (state, _swarm) = simulated_state();

        let (status, body) = get_json(build_router(state), "/info/not%20valid").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidContentId");
    }

    #[tokio::test]
    async fn test_info_open_failure_is_500() {
        let (state, swarm) = simulated_state();
        let content_id = swarm.add_torrent(movie_torrent());
        swarm.fail_open(&content_id, "tracker returned failure");

        let (status, body) = get_json(build_router(state.clone()), "/info/abc123").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "OpenError");
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_info_open_timeout_is_408() {
        let (state, _swarm) = simulated_state();
        let uri = format!("/info/{}", "ab".repeat(20));

        let (status, body) = get_json(build_router(state), &uri).await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["kind"], "OpenTimeout");
    }
}
