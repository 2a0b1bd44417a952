//! Undertow Core - torrent-backed streaming cache
//!
//! Keeps a bounded pool of swarm engines warm in memory, multiplexes HTTP
//! range reads over each engine, records client-reported watch progress and
//! evicts engines by completion state and age.

pub mod config;
pub mod janitor;
pub mod mode;
pub mod progress;
pub mod registry;
pub mod streaming;
pub mod swarm;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use janitor::{CacheJanitor, EvictionReason, JanitorHandle, RetentionPolicy};
pub use mode::RuntimeMode;
pub use progress::{ProgressError, ProgressReport, ProgressTracker};
pub use registry::{ActiveRead, EngineEntry, EngineRegistry, RegistryError, RegistryStats};
pub use streaming::{RangeStreamer, StreamError, StreamPlan};
pub use swarm::{
    ContentId, FileDescriptor, MagnetError, MagnetLink, SimulatedSwarm, SimulatedTorrent,
    SwarmBackend, SwarmEngine, SwarmError, SwarmProgress,
};

/// Errors that can bubble up from any Undertow subsystem.
///
/// Returned by whole-process entry points such as the HTTP server; request
/// paths keep the narrower per-module errors.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Magnet error: {0}")]
    Magnet(#[from] MagnetError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UndertowError>;
