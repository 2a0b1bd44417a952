//! Real-listener server fixture shared by the end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use undertow_core::{RuntimeMode, SimulatedSwarm, SimulatedTorrent, UndertowConfig};
use undertow_web::{AppState, serve};

/// Server bound to an ephemeral localhost port over a simulated swarm.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub swarm: SimulatedSwarm,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    /// Starts a development-mode server with an empty simulated catalog.
    pub async fn start() -> Self {
        let config = UndertowConfig::for_testing();
        let swarm = SimulatedSwarm::new(config.simulation.clone());
        let state = AppState::with_backend(
            Arc::new(swarm.clone()),
            &config,
            RuntimeMode::Development,
        );
        Self::start_with_state(state, swarm, &config).await
    }

    /// Starts a server around a prepared state.
    pub async fn start_with_state(
        state: AppState,
        swarm: SimulatedSwarm,
        config: &UndertowConfig,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(serve(
            listener,
            state.clone(),
            config.janitor.clone(),
            config.server.drain_timeout,
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        Self {
            base_url: format!("http://{address}"),
            state,
            swarm,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Triggers graceful shutdown and waits for the server to stop.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("server did not shut down")
                .unwrap()
                .unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Two-file torrent registered under the opaque id `abc123`.
pub fn movie_torrent() -> SimulatedTorrent {
    SimulatedTorrent::new("Example Movie")
        .with_content_id("abc123".parse().unwrap())
        .with_file("extras/sample.mp4", 2 * 1024 * 1024)
        .with_file("movie.mkv", 12 * 1024 * 1024)
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
