//! Swarm engine abstraction the cache is built on.
//!
//! A swarm engine is a live handle into one torrent swarm: it resolves
//! metadata, reports progress and serves byte-range reads of individual
//! files. The cache never speaks the peer wire protocol itself; it owns
//! engines produced by an injected [`SwarmBackend`].

pub mod magnet;
pub mod simulated;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

pub use magnet::{ContentId, MagnetError, MagnetLink};
pub use simulated::{SimulatedSwarm, SimulatedTorrent};

/// Stream of file bytes produced by a range read.
///
/// Dropping the stream releases the underlying reader.
pub type ByteStream = BoxStream<'static, Result<Bytes, SwarmError>>;

/// A file inside a torrent as reported by a ready engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    /// Path of the file inside the torrent, `/` separated
    pub name: String,
    /// File size in bytes
    pub length: u64,
    /// Position of the file within the torrent's file list
    pub index: usize,
}

/// Aggregate download state of one swarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmProgress {
    /// Downloaded fraction of the whole torrent, 0.0 to 1.0
    pub fraction_complete: f64,
    pub download_rate: u64,
    pub peer_count: usize,
    pub seed_count: usize,
}

/// Errors reported by a swarm engine or backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SwarmError {
    #[error("Metadata resolution failed: {reason}")]
    MetadataFailed { reason: String },

    #[error("File index {index} out of bounds ({count} files)")]
    InvalidFileIndex { index: usize, count: usize },

    #[error("Range {start}-{end} outside file of {length} bytes")]
    RangeOutOfBounds { start: u64, end: u64, length: u64 },

    #[error("Read failed: {reason}")]
    Read { reason: String },

    #[error("Engine closed")]
    Closed,
}

/// Opens swarm engines from magnet links.
#[async_trait::async_trait]
pub trait SwarmBackend: Send + Sync {
    /// Joins the swarm and resolves torrent metadata.
    ///
    /// May never complete (no peers, bad magnet); callers enforce their own
    /// timeout. Dropping the returned future must abandon the attempt.
    ///
    /// # Errors
    ///
    /// - `SwarmError::MetadataFailed` - The swarm rejected or could not resolve the torrent
    async fn open(&self, magnet: &MagnetLink) -> Result<Box<dyn SwarmEngine>, SwarmError>;
}

/// A ready engine for one torrent.
#[async_trait::async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Torrent display name.
    fn name(&self) -> String;

    /// Files contained in the torrent, in torrent order.
    fn files(&self) -> Vec<FileDescriptor>;

    /// Opens a read stream over `start..=end_inclusive` of one file.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidFileIndex` - No such file
    /// - `SwarmError::RangeOutOfBounds` - Range exceeds the file
    /// - `SwarmError::Closed` - Engine already closed
    async fn read_range(
        &self,
        file_index: usize,
        start: u64,
        end_inclusive: u64,
    ) -> Result<ByteStream, SwarmError>;

    /// Current download progress and peer counts.
    fn progress(&self) -> SwarmProgress;

    /// Leaves the swarm and releases all resources. Idempotent.
    async fn close(&self);

    /// Whether several range reads may be in flight at once.
    fn supports_concurrent_reads(&self) -> bool {
        true
    }

    /// Total size of all files in bytes.
    fn total_length(&self) -> u64 {
        self.files().iter().map(|file| file.length).sum()
    }
}
