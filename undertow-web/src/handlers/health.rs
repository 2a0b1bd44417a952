//! Liveness and cache occupancy.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"unavailable"` when no swarm backend is installed
    pub status: &'static str,
    pub active_entries: usize,
    pub idle_entries: usize,
    pub opening_entries: usize,
    pub mode: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats();

    Json(HealthResponse {
        status: if state.registry.is_available() {
            "ok"
        } else {
            "unavailable"
        },
        active_entries: stats.active_entries,
        idle_entries: stats.idle_entries,
        opening_entries: stats.opening_entries,
        mode: state.mode.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use undertow_core::{MagnetLink, RuntimeMode, UndertowConfig};

    use crate::server::test_support::{movie_torrent, simulated_state};
    use crate::server::{AppState, build_router};

    async fn fetch_health(state: AppState) -> Value {
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_occupancy() {
        let (state, swarm) = simulated_state();
        let content_id = swarm.add_torrent(movie_torrent());
        let entry = state
            .registry
            .get_or_create(&MagnetLink::from(content_id))
            .await
            .unwrap();

        let idle = fetch_health(state.clone()).await;
        assert_eq!(idle["status"], "ok");
        assert_eq!(idle["activeEntries"], 0);
        assert_eq!(idle["idleEntries"], 1);
        assert_eq!(idle["mode"], "development");

        let _read = entry.begin_read(1);
        let active = fetch_health(state).await;
        assert_eq!(active["activeEntries"], 1);
        assert_eq!(active["idleEntries"], 0);
    }

    #[tokio::test]
    async fn test_health_without_backend_is_unavailable() {
        let state = AppState::for_mode(&UndertowConfig::for_testing(), RuntimeMode::Production);

        let body = fetch_health(state).await;

        assert_eq!(body["status"], "unavailable");
        assert_eq!(body["mode"], "production");
    }
}
