//! Production mode without a swarm backend.

use reqwest::StatusCode;
use serde_json::{Value, json};
use undertow_core::{RuntimeMode, SimulatedSwarm, UndertowConfig};
use undertow_web::AppState;

use crate::server_fixture::TestServer;

#[tokio::test]
async fn test_engine_routes_answer_503_without_backend() {
    let config = UndertowConfig::for_testing();
    let state = AppState::for_mode(&config, RuntimeMode::Production);
    // Not wired into the state
    let swarm = SimulatedSwarm::new(config.simulation.clone());
    let server = TestServer::start_with_state(state, swarm, &config).await;
    let info_hash = "ef".repeat(20);

    let info = server
        .client
        .get(server.url(&format!("/info/{info_hash}")))
        .send()
        .await
        .unwrap();
    assert_eq!(info.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = info.json().await.unwrap();
    assert_eq!(body["kind"], "EngineUnavailable");

    let stream = server
        .client
        .get(server.url(&format!("/stream/{info_hash}")))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::SERVICE_UNAVAILABLE);

    let progress = server
        .client
        .post(server.url("/progress"))
        .json(&json!({ "contentId": info_hash, "progress": 0.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(progress.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "unavailable");
    assert_eq!(health["mode"], "production");

    assert_eq!(server.swarm.open_count(), 0);
    server.stop().await;
}
