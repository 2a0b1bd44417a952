//! Watch progress reports from playback clients.

use axum::Json;
use axum::extract::State;
use bytes::Bytes;
use serde_json::{Value, json};
use undertow_core::{MagnetLink, RegistryError};

use super::ApiError;
use crate::server::AppState;

/// `POST /progress` with body `{"contentId": "...", "progress": 0.42}`.
///
/// The body is parsed by hand so every malformed payload, including
/// non-numeric progress values, maps to 400.
///
/// # Errors
///
/// - `ApiError::Registry` - No swarm backend installed (503)
/// - `ApiError::BadRequest` - Body is not the expected JSON object (400)
/// - `ApiError::Magnet` - Unparsable content id (400)
/// - `ApiError::Progress` - Progress outside `[0, 1]` (400)
pub async fn report_progress(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !state.registry.is_available() {
        return Err(RegistryError::EngineUnavailable.into());
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
        reason: format!("invalid JSON body: {e}"),
    })?;

    let content_id = payload
        .get("contentId")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest {
            reason: "contentId must be a string".to_string(),
        })?;
    let progress = payload
        .get("progress")
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::BadRequest {
            reason: "progress must be a number".to_string(),
        })?;

    let magnet = MagnetLink::resolve(content_id)?;
    let report = state.tracker.report(magnet.content_id(), progress)?;

    Ok(Json(json!({
        "success": true,
        "contentId": report.content_id,
        "progress": report.progress,
        "watchFraction": report.watch_fraction,
    })))
}
