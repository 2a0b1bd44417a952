//! Router assembly and server lifecycle.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use undertow_core::config::JanitorConfig;
use undertow_core::{
    CacheJanitor, EngineRegistry, ProgressTracker, RangeStreamer, RuntimeMode, SimulatedSwarm,
    SwarmBackend, UndertowConfig,
};

use crate::handlers::{health, info, report_progress, stream_default_file, stream_file};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: EngineRegistry,
    pub streamer: RangeStreamer,
    pub tracker: ProgressTracker,
    pub mode: RuntimeMode,
    pub started_at: Instant,
}

impl AppState {
    /// Wraps an existing registry.
    pub fn new(registry: EngineRegistry, config: &UndertowConfig, mode: RuntimeMode) -> Self {
        Self {
            streamer: RangeStreamer::new(config.streaming.clone()),
            tracker: ProgressTracker::new(registry.clone()),
            registry,
            mode,
            started_at: Instant::now(),
        }
    }

    /// Builds state around a caller-supplied swarm backend.
    pub fn with_backend(
        backend: Arc<dyn SwarmBackend>,
        config: &UndertowConfig,
        mode: RuntimeMode,
    ) -> Self {
        Self::new(
            EngineRegistry::new(backend, config.registry.clone()),
            config,
            mode,
        )
    }

    /// Builds the default state for `mode`.
    ///
    /// Development mode serves the simulated demo catalog. Production mode
    /// has no backend of its own, so every engine route answers 503 until an
    /// embedding application uses [`AppState::with_backend`].
    pub fn for_mode(config: &UndertowConfig, mode: RuntimeMode) -> Self {
        match mode {
            RuntimeMode::Development => {
                let swarm = SimulatedSwarm::with_demo_catalog(config.simulation.clone());
                for (content_id, name) in swarm.catalog() {
                    tracing::info!("Demo content {}: {}", content_id, name);
                }
                Self::with_backend(Arc::new(swarm), config, mode)
            }
            RuntimeMode::Production => {
                tracing::warn!(
                    "No swarm backend installed, engine routes will answer 503 Service Unavailable"
                );
                Self::new(
                    EngineRegistry::unavailable(config.registry.clone()),
                    config,
                    mode,
                )
            }
        }
    }
}

/// Creates the router for the cache's HTTP surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/info/{content_id}", get(info))
        .route("/stream/{content_id}", get(stream_default_file))
        .route("/stream/{content_id}/{file_index}", get(stream_file))
        .route("/progress", post(report_progress))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// Runs the cache janitor for the lifetime of the server. Once `shutdown`
/// resolves, open connections get `drain_timeout` to finish; after that the
/// janitor is stopped and every cached engine is closed even if a stalled
/// client is still holding a response open.
///
/// # Errors
///
/// - `std::io::Error` - If accepting connections fails
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    janitor_config: JanitorConfig,
    drain_timeout: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let janitor = CacheJanitor::new(registry.clone(), janitor_config).spawn();

    let (draining_tx, draining_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    let served = tokio::select! {
        result = &mut server => result,
        Ok(()) = draining_rx => {
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        "Connections still open after {:?}, closing engines anyway",
                        drain_timeout
                    );
                    Ok(())
                }
            }
        }
    };

    janitor.shutdown();
    registry.shutdown().await;
    served
}

/// Binds the configured address and serves until Ctrl-C.
///
/// # Errors
///
/// - `UndertowError::Io` - If the address cannot be bound or serving fails
pub async fn run_server(config: UndertowConfig, mode: RuntimeMode) -> undertow_core::Result<()> {
    let state = AppState::for_mode(&config, mode);

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    tracing::info!(
        "Undertow streaming cache running on http://{} ({} mode)",
        listener.local_addr()?,
        mode
    );

    serve(
        listener,
        state,
        config.janitor.clone(),
        config.server.drain_timeout,
        shutdown_signal(),
    )
    .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining connections");
}


#[cfg(test)]
mod tests {
    use undertow_core::UndertowError;

    use super::*;

    #[tokio::test]
    async fn test_run_server_reports_bind_failure() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = UndertowConfig::for_testing();
        config.server.port = occupied.local_addr().unwrap().port();

        let result = run_server(config, RuntimeMode::Production).await;

        assert!(matches!(result, Err(UndertowError::Io(_))));
    }
}
