//! Lookup, range streaming, disconnect and progress over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use serde_json::{Value, json};
use undertow_core::{ContentId, SimulatedTorrent};

use crate::server_fixture::{TestServer, eventually, movie_torrent};

#[tokio::test]
async fn test_info_then_stream_default_file() {
    let server = TestServer::start().await;
    server.swarm.add_torrent(movie_torrent());

    let info: Value = server
        .client
        .get(server.url("/info/abc123"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], "Example Movie");
    assert_eq!(info["defaultFileIndex"], 1);
    assert_eq!(info["files"][0]["name"], "extras/sample.mp4");

    let response = server
        .client
        .get(server.url("/stream/abc123"))
        .header(RANGE, "bytes=1000-1999")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_TYPE], "video/x-matroska");
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes 1000-1999/{}", 12 * 1024 * 1024)
    );
    assert_eq!(response.headers()[CONTENT_LENGTH], "1000");

    let body = response.bytes().await.unwrap();
    let expected: Vec<u8> = (1000..2000)
        .map(|offset| SimulatedTorrent::byte_at(1, offset))
        .collect();
    assert_eq!(body.as_ref(), expected.as_slice());

    // The lookup and the stream share one engine
    assert_eq!(server.swarm.open_count(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_suffix_range_and_unsatisfiable_range() {
    let server = TestServer::start().await;
    let content_id = server
        .swarm
        .add_torrent(SimulatedTorrent::new("clip").with_file("clip.webm", 5000));

    let tail = server
        .client
        .get(server.url(&format!("/stream/{content_id}/0")))
        .header(RANGE, "bytes=-500")
        .send()
        .await
        .unwrap();
    assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(tail.headers()[CONTENT_RANGE], "bytes 4500-4999/5000");
    assert_eq!(tail.bytes().await.unwrap().len(), 500);

    let past_end = server
        .client
        .get(server.url(&format!("/stream/{content_id}/0")))
        .header(RANGE, "bytes=5000-")
        .send()
        .await
        .unwrap();
    assert_eq!(past_end.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(past_end.headers()[CONTENT_RANGE], "bytes */5000");

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_reader_but_keeps_engine() {
    let server = TestServer::start().await;
    // Large enough that socket buffers cannot absorb the whole body
    let content_id = server.swarm.add_torrent(
        SimulatedTorrent::new("long feature").with_file("feature.mp4", 64 * 1024 * 1024),
    );

    let mut response = server
        .client
        .get(server.url(&format!("/stream/{content_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut received = 0;
    while received < 5 * 1024 * 1024 {
        received += response.chunk().await.unwrap().unwrap().len();
    }
    let entry = server.state.registry.get(&content_id).unwrap();
    assert_eq!(entry.active_reads(), 1);

    // Closing the connection mid-body
    drop(response);

    let swarm = server.swarm.clone();
    assert!(
        eventually(Duration::from_secs(5), || swarm.open_read_streams() == 0).await,
        "engine read stream was not released after disconnect"
    );
    assert!(eventually(Duration::from_secs(1), || entry.active_reads() == 0).await);
    assert_eq!(server.swarm.close_count(), 0);

    // The next lookup reuses the cached engine
    let again = server
        .client
        .get(server.url(&format!("/info/{content_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(server.swarm.open_count(), 1);
    assert!(Arc::ptr_eq(
        &entry,
        &server.state.registry.get(&content_id).unwrap()
    ));

    server.stop().await;
}

#[tokio::test]
async fn test_progress_reports_raise_watch_fraction() {
    let server = TestServer::start().await;
    let content_id = server.swarm.add_torrent(movie_torrent());
    server
        .client
        .get(server.url("/info/abc123"))
        .send()
        .await
        .unwrap();

    for (progress, expected_watch) in [(0.3, 0.3), (0.8, 0.8), (0.1, 0.8)] {
        let response = server
            .client
            .post(server.url("/progress"))
            .json(&json!({ "contentId": "abc123", "progress": progress }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["progress"], progress);
        assert_eq!(body["watchFraction"], expected_watch);
    }

    let rejected = server
        .client
        .post(server.url("/progress"))
        .json(&json!({ "contentId": "abc123", "progress": 2.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let entry = server.state.registry.get(&content_id).unwrap();
    assert_eq!(entry.watch_fraction(), 0.8);
    server.stop().await;
}

#[tokio::test]
async fn test_health_reports_cache_occupancy() {
    let server = TestServer::start().await;
    server.swarm.add_torrent(movie_torrent());

    let empty: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["status"], "ok");
    assert_eq!(empty["mode"], "development");
    assert_eq!(empty["idleEntries"], 0);

    server
        .client
        .get(server.url("/info/abc123"))
        .send()
        .await
        .unwrap();

    let warm: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(warm["idleEntries"], 1);
    assert_eq!(warm["activeEntries"], 0);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_cached_engines() {
    let server = TestServer::start().await;
    let content_id: ContentId = server.swarm.add_torrent(movie_torrent());
    server
        .client
        .get(server.url("/info/abc123"))
        .send()
        .await
        .unwrap();
    assert!(server.state.registry.contains(&content_id));

    let swarm = server.swarm.clone();
    let registry = server.state.registry.clone();
    server.stop().await;

    assert_eq!(swarm.close_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_stalled_reader() {
    let server = TestServer::start().await;
    let content_id = server.swarm.add_torrent(
        SimulatedTorrent::new("paused player").with_file("feature.mkv", 512 * 1024 * 1024),
    );

    let mut response = server
        .client
        .get(server.url(&format!("/stream/{content_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.chunk().await.unwrap().is_some());

    // The client stops reading but keeps the connection open
    let swarm = server.swarm.clone();
    let registry = server.state.registry.clone();
    let started = tokio::time::Instant::now();
    server.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(swarm.close_count(), 1);
    assert!(registry.is_empty());
    drop(response);
}
