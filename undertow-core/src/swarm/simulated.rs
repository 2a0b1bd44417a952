//! In-process swarm used by development mode and tests.
//!
//! File content is synthesized from `(file index, offset)` so arbitrarily
//! large torrents cost no memory. The swarm can be told to fail opens,
//! to fail reads at a byte offset, or to never resolve unknown content, and
//! it counts opens, closes and live read streams so callers can verify that
//! readers are released.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use rand::{Rng, rng};
use sha1::{Digest, Sha1};
use tokio::time::Instant;

use super::{
    ByteStream, ContentId, FileDescriptor, MagnetLink, SwarmBackend, SwarmEngine, SwarmError,
    SwarmProgress,
};
use crate::config::SimulationConfig;

const READ_CHUNK_SIZE: usize = 64 * 1024;
const SIMULATED_FULL_DOWNLOAD_SECS: f64 = 600.0;

/// A torrent known to the simulated swarm.
#[derive(Debug, Clone)]
pub struct SimulatedTorrent {
    content_id: ContentId,
    name: String,
    files: Vec<(String, u64)>,
}

impl SimulatedTorrent {
    /// Creates an empty torrent whose info-hash is the SHA-1 of its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let digest = Sha1::digest(name.as_bytes());
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);

        Self {
            content_id: ContentId::from_info_hash(hash),
            name,
            files: Vec::new(),
        }
    }

    /// Overrides the derived content id.
    pub fn with_content_id(mut self, content_id: ContentId) -> Self {
        self.content_id = content_id;
        self
    }

    /// Appends a file of `length` bytes.
    pub fn with_file(mut self, path: impl Into<String>, length: u64) -> Self {
        self.files.push((path.into(), length));
        self
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Synthetic byte stored at `offset` of file `file_index`.
    pub fn byte_at(file_index: usize, offset: u64) -> u8 {
        ((offset + file_index as u64 * 7) % 251) as u8
    }

    fn descriptors(&self) -> Vec<FileDescriptor> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, (name, length))| FileDescriptor {
                name: name.clone(),
                length: *length,
                index,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct SwarmCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_reads: AtomicUsize,
}

struct SwarmState {
    config: SimulationConfig,
    catalog: RwLock<HashMap<ContentId, SimulatedTorrent>>,
    open_failures: RwLock<HashMap<ContentId, String>>,
    read_failures: RwLock<HashMap<ContentId, u64>>,
    sequential_only: AtomicBool,
    counters: Arc<SwarmCounters>,
}

/// Simulated swarm backend.
///
/// Cloning shares the catalog and counters.
#[derive(Clone)]
pub struct SimulatedSwarm {
    state: Arc<SwarmState>,
}

impl SimulatedSwarm {
    /// Creates a swarm with an empty catalog.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            state: Arc::new(SwarmState {
                config,
                catalog: RwLock::new(HashMap::new()),
                open_failures: RwLock::new(HashMap::new()),
                read_failures: RwLock::new(HashMap::new()),
                sequential_only: AtomicBool::new(false),
                counters: Arc::new(SwarmCounters::default()),
            }),
        }
    }

    /// Creates a swarm preloaded with a few demo torrents.
    pub fn with_demo_catalog(config: SimulationConfig) -> Self {
        let swarm = Self::new(config);
        swarm.add_torrent(
            SimulatedTorrent::new("Big Buck Bunny (2008)")
                .with_file("Big Buck Bunny/movie.mkv", 900 * 1024 * 1024)
                .with_file("Big Buck Bunny/sample.mp4", 5 * 1024 * 1024)
                .with_file("Big Buck Bunny/README.txt", 2 * 1024),
        );
        swarm.add_torrent(
            SimulatedTorrent::new("Sintel (2010)")
                .with_file("Sintel/sintel.mp4", 620 * 1024 * 1024)
                .with_file("Sintel/subs/en.srt", 48 * 1024),
        );
        swarm.add_torrent(
            SimulatedTorrent::new("Tears of Steel (2012)")
                .with_file("tears_of_steel.webm", 370 * 1024 * 1024),
        );
        swarm
    }

    /// Registers a torrent; returns its content id.
    pub fn add_torrent(&self, torrent: SimulatedTorrent) -> ContentId {
        let content_id = torrent.content_id.clone();
        self.state
            .catalog
            .write()
            .insert(content_id.clone(), torrent);
        content_id
    }

    /// Lists the content ids in the catalog.
    pub fn catalog(&self) -> Vec<(ContentId, String)> {
        let mut entries: Vec<_> = self
            .state
            .catalog
            .read()
            .values()
            .map(|torrent| (torrent.content_id.clone(), torrent.name.clone()))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        entries
    }

    /// Makes every future open of `content_id` fail with `reason`.
    pub fn fail_open(&self, content_id: &ContentId, reason: impl Into<String>) {
        self.state
            .open_failures
            .write()
            .insert(content_id.clone(), reason.into());
    }

    /// Makes reads of `content_id` fail once they reach file offset `offset`.
    pub fn fail_reads_at(&self, content_id: &ContentId, offset: u64) {
        self.state
            .read_failures
            .write()
            .insert(content_id.clone(), offset);
    }

    /// Makes engines opened from now on report that reads must be serialized.
    pub fn set_sequential_only(&self, sequential_only: bool) {
        self.state
            .sequential_only
            .store(sequential_only, Ordering::SeqCst);
    }

    /// Number of `open` calls received.
    pub fn open_count(&self) -> usize {
        self.state.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of engines closed.
    pub fn close_count(&self) -> usize {
        self.state.counters.closes.load(Ordering::SeqCst)
    }

    /// Number of read streams currently alive.
    pub fn open_read_streams(&self) -> usize {
        self.state.counters.open_reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SwarmBackend for SimulatedSwarm {
    async fn open(&self, magnet: &MagnetLink) -> Result<Box<dyn SwarmEngine>, SwarmError> {
        self.state.counters.opens.fetch_add(1, Ordering::SeqCst);
        let content_id = magnet.content_id();

        let failure = self.state.open_failures.read().get(content_id).cloned();
        if let Some(reason) = failure {
            tokio::time::sleep(self.state.config.open_latency).await;
            return Err(SwarmError::MetadataFailed { reason });
        }

        let torrent = self.state.catalog.read().get(content_id).cloned();
        let Some(torrent) = torrent else {
            // Unknown content behaves like a swarm without peers
            tracing::debug!("No simulated peers for {}, metadata will never resolve", content_id);
            return std::future::pending().await;
        };

        tokio::time::sleep(self.state.config.open_latency).await;
        tracing::debug!(
            "Simulated swarm resolved metadata for {} ({} files)",
            torrent.name,
            torrent.files.len()
        );

        Ok(Box::new(SimulatedEngine {
            read_failure_at: self.state.read_failures.read().get(content_id).copied(),
            sequential_only: self.state.sequential_only.load(Ordering::SeqCst),
            chunk_delay: self.state.config.read_chunk_delay,
            counters: Arc::clone(&self.state.counters),
            closed: Arc::new(AtomicBool::new(false)),
            opened_at: Instant::now(),
            torrent,
        }))
    }
}

struct SimulatedEngine {
    torrent: SimulatedTorrent,
    read_failure_at: Option<u64>,
    sequential_only: bool,
    chunk_delay: std::time::Duration,
    counters: Arc<SwarmCounters>,
    closed: Arc<AtomicBool>,
    opened_at: Instant,
}

/// Keeps the live-reader counter accurate however the stream ends.
struct ReaderGuard(Arc<SwarmCounters>);

impl ReaderGuard {
    fn new(counters: Arc<SwarmCounters>) -> Self {
        counters.open_reads.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.open_reads.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ReadCursor {
    file_index: usize,
    offset: u64,
    end: u64,
    fail_at: Option<u64>,
    chunk_delay: std::time::Duration,
    closed: Arc<AtomicBool>,
    _guard: ReaderGuard,
}

#[async_trait::async_trait]
impl SwarmEngine for SimulatedEngine {
    fn name(&self) -> String {
        self.torrent.name.clone()
    }

    fn files(&self) -> Vec<FileDescriptor> {
        self.torrent.descriptors()
    }

    async fn read_range(
        &self,
        file_index: usize,
        start: u64,
        end_inclusive: u64,
    ) -> Result<ByteStream, SwarmError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwarmError::Closed);
        }

        let count = self.torrent.files.len();
        let (_, length) = self
            .torrent
            .files
            .get(file_index)
            .ok_or(SwarmError::InvalidFileIndex {
                index: file_index,
                count,
            })?;
        if start > end_inclusive || end_inclusive >= *length {
            return Err(SwarmError::RangeOutOfBounds {
                start,
                end: end_inclusive,
                length: *length,
            });
        }

        let cursor = ReadCursor {
            file_index,
            offset: start,
            end: end_inclusive + 1,
            fail_at: self.read_failure_at,
            chunk_delay: self.chunk_delay,
            closed: Arc::clone(&self.closed),
            _guard: ReaderGuard::new(Arc::clone(&self.counters)),
        };

        let stream = stream::unfold(Some(cursor), |cursor| async move {
            let mut cursor = cursor?;
            if cursor.offset >= cursor.end {
                return None;
            }
            if !cursor.chunk_delay.is_zero() {
                tokio::time::sleep(cursor.chunk_delay).await;
            }
            if cursor.closed.load(Ordering::SeqCst) {
                return Some((Err(SwarmError::Closed), None));
            }
            if let Some(fail_at) = cursor.fail_at {
                if cursor.offset >= fail_at {
                    let error = SwarmError::Read {
                        reason: format!("simulated peer failure at byte {fail_at}"),
                    };
                    return Some((Err(error), None));
                }
            }

            let mut chunk_end = cursor.end.min(cursor.offset + READ_CHUNK_SIZE as u64);
            if let Some(fail_at) = cursor.fail_at {
                if fail_at > cursor.offset {
                    chunk_end = chunk_end.min(fail_at);
                }
            }
            let chunk: Vec<u8> = (cursor.offset..chunk_end)
                .map(|offset| SimulatedTorrent::byte_at(cursor.file_index, offset))
                .collect();
            cursor.offset = chunk_end;

            Some((Ok(Bytes::from(chunk)), Some(cursor)))
        });

        Ok(stream.boxed())
    }

    fn progress(&self) -> SwarmProgress {
        let elapsed = self.opened_at.elapsed().as_secs_f64();
        let fraction_complete = (elapsed / SIMULATED_FULL_DOWNLOAD_SECS).min(1.0);
        let mut rng = rng();
        let peer_count = rng.random_range(8..40);

        SwarmProgress {
            fraction_complete,
            download_rate: if fraction_complete < 1.0 {
                rng.random_range(512 * 1024..4 * 1024 * 1024)
            } else {
                0
            },
            peer_count,
            seed_count: peer_count / 3,
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Simulated engine for {} closed", self.torrent.name);
        }
    }

    fn supports_concurrent_reads(&self) -> bool {
        !self.sequential_only
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn fast_config() -> SimulationConfig {
        SimulationConfig {
            open_latency: Duration::from_millis(1),
            read_chunk_delay: Duration::ZERO,
        }
    }

    fn test_swarm() -> (SimulatedSwarm, MagnetLink) {
        let swarm = SimulatedSwarm::new(fast_config());
        let content_id = swarm.add_torrent(
            SimulatedTorrent::new("fixture")
                .with_file("a.mp4", 200_000)
                .with_file("b.txt", 10),
        );
        (swarm, MagnetLink::from(content_id))
    }

    async fn collect(stream: ByteStream) -> Result<Vec<u8>, SwarmError> {
        let chunks: Vec<_> = stream.collect().await;
        let mut data = Vec::new();
        for chunk in chunks {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    #[tokio::test]
    async fn test_open_lists_files() {
        let (swarm, magnet) = test_swarm();
        let engine = swarm.open(&magnet).await.unwrap();

        let files = engine.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.mp4");
        assert_eq!(files[1].index, 1);
        assert_eq!(engine.total_length(), 200_010);
        assert_eq!(swarm.open_count(), 1);
    }

    #[tokio::test]
    async fn test_read_range_yields_exact_bytes() {
        let (swarm, magnet) = test_swarm();
        let engine = swarm.open(&magnet).await.unwrap();

        let data = collect(engine.read_range(0, 100_000, 170_000).await.unwrap())
            .await
            .unwrap();

        assert_eq!(data.len(), 70_001);
        assert_eq!(data[0], SimulatedTorrent::byte_at(0, 100_000));
        assert_eq!(data[70_000], SimulatedTorrent::byte_at(0, 170_000));
        assert_eq!(swarm.open_read_streams(), 0);
    }

    #[tokio::test]
    async fn test_read_range_validates_bounds() {
        let (swarm, magnet) = test_swarm();
        let engine = swarm.open(&magnet).await.unwrap();

        assert!(matches!(
            engine.read_range(5, 0, 1).await,
            Err(SwarmError::InvalidFileIndex { index: 5, count: 2 })
        ));
        assert!(matches!(
            engine.read_range(1, 0, 10).await,
            Err(SwarmError::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_reader() {
        let (swarm, magnet) = test_swarm();
        let engine = swarm.open(&magnet).await.unwrap();

        let mut stream = engine.read_range(0, 0, 199_999).await.unwrap();
        assert!(stream.next().await.is_some());
        assert_eq!(swarm.open_read_streams(), 1);

        drop(stream);
        assert_eq!(swarm.open_read_streams(), 0);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let (swarm, magnet) = test_swarm();
        swarm.fail_reads_at(magnet.content_id(), 1_000);
        let engine = swarm.open(&magnet).await.unwrap();

        let mut stream = engine.read_range(0, 0, 5_000).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1_000);
        assert!(matches!(
            stream.next().await,
            Some(Err(SwarmError::Read { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_open_failure() {
        let (swarm, magnet) = test_swarm();
        swarm.fail_open(magnet.content_id(), "tracker unreachable");

        let result = swarm.open(&magnet).await;
        assert!(matches!(result, Err(SwarmError::MetadataFailed { .. })));
    }

    #[tokio::test]
    async fn test_unknown_content_never_resolves() {
        let (swarm, _) = test_swarm();
        let unknown = MagnetLink::from(ContentId::from_info_hash([9u8; 20]));

        let result = tokio::time::timeout(Duration::from_millis(50), swarm.open(&unknown)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_reads() {
        let (swarm, magnet) = test_swarm();
        let engine = swarm.open(&magnet).await.unwrap();

        engine.close().await;
        engine.close().await;

        assert_eq!(swarm.close_count(), 1);
        assert!(matches!(
            engine.read_range(0, 0, 1).await,
            Err(SwarmError::Closed)
        ));
    }

    #[test]
    fn test_demo_catalog_ids_are_stable() {
        let first = SimulatedSwarm::with_demo_catalog(SimulationConfig::default()).catalog();
        let second = SimulatedSwarm::with_demo_catalog(SimulationConfig::default()).catalog();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
