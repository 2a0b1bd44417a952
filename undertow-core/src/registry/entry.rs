//! A live engine plus the bookkeeping the cache keeps about it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::swarm::{ContentId, SwarmEngine};

#[derive(Debug, Clone, Copy)]
struct Bookkeeping {
    last_access: Instant,
    watch_fraction: f64,
}

/// One cached swarm engine.
///
/// Shared between the registry, in-flight HTTP responses and janitor sweeps
/// through `Arc`. The engine is closed by whoever removes the entry from the
/// registry, never by the last `Arc` holder.
pub struct EngineEntry {
    content_id: ContentId,
    engine: Box<dyn SwarmEngine>,
    created_at: Instant,
    bookkeeping: Mutex<Bookkeeping>,
    active_reads: AtomicUsize,
    reads_started: AtomicUsize,
    read_gate: Arc<tokio::sync::Mutex<()>>,
    progress_logger: Mutex<Option<JoinHandle<()>>>,
}

impl EngineEntry {
    pub(crate) fn new(content_id: ContentId, engine: Box<dyn SwarmEngine>) -> Self {
        let now = Instant::now();
        Self {
            content_id,
            engine,
            created_at: now,
            bookkeeping: Mutex::new(Bookkeeping {
                last_access: now,
                watch_fraction: 0.0,
            }),
            active_reads: AtomicUsize::new(0),
            reads_started: AtomicUsize::new(0),
            read_gate: Arc::new(tokio::sync::Mutex::new(())),
            progress_logger: Mutex::new(None),
        }
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn engine(&self) -> &dyn SwarmEngine {
        self.engine.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        self.bookkeeping.lock().last_access
    }

    /// Time since the entry was last touched.
    pub fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }

    /// Highest watch fraction any client has reported, 0.0 until then.
    pub fn watch_fraction(&self) -> f64 {
        self.bookkeeping.lock().watch_fraction
    }

    /// Number of HTTP responses currently streaming from this engine.
    pub fn active_reads(&self) -> usize {
        self.active_reads.load(Ordering::SeqCst)
    }

    /// Number of range reads ever started, including finished ones.
    pub fn reads_started(&self) -> usize {
        self.reads_started.load(Ordering::SeqCst)
    }

    /// Marks the entry as used now.
    pub fn touch(&self) {
        self.bookkeeping.lock().last_access = Instant::now();
    }

    /// Raises the watch fraction to `fraction` if it is higher; returns the stored value.
    pub(crate) fn raise_watch_fraction(&self, fraction: f64) -> f64 {
        let mut bookkeeping = self.bookkeeping.lock();
        bookkeeping.last_access = Instant::now();
        if fraction > bookkeeping.watch_fraction {
            bookkeeping.watch_fraction = fraction;
        }
        bookkeeping.watch_fraction
    }

    /// Gate used to serialize reads on engines that cannot interleave them.
    pub(crate) fn read_gate(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.read_gate)
    }

    /// Registers a new in-flight read of `expected_bytes` bytes.
    pub fn begin_read(self: &Arc<Self>, expected_bytes: u64) -> ActiveRead {
        self.active_reads.fetch_add(1, Ordering::SeqCst);
        self.reads_started.fetch_add(1, Ordering::SeqCst);
        self.touch();

        let read = ActiveRead {
            entry: Arc::clone(self),
            read_id: Uuid::new_v4(),
            expected_bytes,
            bytes_served: 0,
        };
        tracing::debug!(
            "Read {} started on {} ({} bytes, {} active)",
            read.read_id,
            self.content_id.short(),
            expected_bytes,
            self.active_reads()
        );
        read
    }

    pub(crate) fn set_progress_logger(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.progress_logger.lock().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn stop_progress_logger(&self) {
        if let Some(handle) = self.progress_logger.lock().take() {
            handle.abort();
        }
    }

    /// Stops background work and closes the engine.
    pub(crate) async fn shut_down(&self) {
        self.stop_progress_logger();
        self.engine.close().await;
    }
}

impl std::fmt::Debug for EngineEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEntry")
            .field("content_id", &self.content_id)
            .field("name", &self.engine.name())
            .field("watch_fraction", &self.watch_fraction())
            .field("active_reads", &self.active_reads())
            .finish()
    }
}

/// RAII marker for one in-flight HTTP response body.
///
/// Holding it keeps the entry's active read count raised; dropping it, on
/// completion or on client disconnect, releases the count and refreshes the
/// entry's last access.
pub struct ActiveRead {
    entry: Arc<EngineEntry>,
    read_id: Uuid,
    expected_bytes: u64,
    bytes_served: u64,
}

impl ActiveRead {
    pub fn read_id(&self) -> Uuid {
        self.read_id
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served
    }

    /// Records bytes handed to the HTTP body.
    pub fn record(&mut self, bytes: usize) {
        self.bytes_served += bytes as u64;
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_served >= self.expected_bytes
    }
}

impl Drop for ActiveRead {
    fn drop(&mut self) {
        self.entry.active_reads.fetch_sub(1, Ordering::SeqCst);
        self.entry.touch();

        if self.is_complete() {
            tracing::debug!(
                "Read {} on {} finished after {} bytes",
                self.read_id,
                self.entry.content_id.short(),
                self.bytes_served
            );
        } else {
            tracing::debug!(
                "Read {} on {} ended early at {}/{} bytes",
                self.read_id,
                self.entry.content_id.short(),
                self.bytes_served,
                self.expected_bytes
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SimulationConfig;
    use crate::swarm::{MagnetLink, SimulatedSwarm, SimulatedTorrent, SwarmBackend};

    async fn test_entry() -> Arc<EngineEntry> {
        let swarm = SimulatedSwarm::new(SimulationConfig {
            open_latency: Duration::ZERO,
            read_chunk_delay: Duration::ZERO,
        });
        let content_id = swarm.add_torrent(SimulatedTorrent::new("entry").with_file("a.mp4", 10));
        let engine = swarm
            .open(&MagnetLink::from(content_id.clone()))
            .await
            .unwrap();
        Arc::new(EngineEntry::new(content_id, engine))
    }

    #[tokio::test]
    async fn test_watch_fraction_only_rises() {
        let entry = test_entry().await;

        assert_eq!(entry.raise_watch_fraction(0.5), 0.5);
        assert_eq!(entry.raise_watch_fraction(0.2), 0.5);
        assert_eq!(entry.raise_watch_fraction(0.7), 0.7);
        assert_eq!(entry.watch_fraction(), 0.7);
    }

    #[tokio::test]
    async fn test_active_read_guard_tracks_count() {
        let entry = test_entry().await;

        let mut first = entry.begin_read(10);
        let second = entry.begin_read(5);
        assert_eq!(entry.active_reads(), 2);

        first.record(10);
        assert!(first.is_complete());
        drop(first);
        assert_eq!(entry.active_reads(), 1);

        assert!(!second.is_complete());
        drop(second);
        assert_eq!(entry.active_reads(), 0);
        assert_eq!(entry.reads_started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_read_refreshes_last_access() {
        let entry = test_entry().await;
        let read = entry.begin_read(10);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(entry.idle_for() >= Duration::from_secs(120));

        drop(read);
        assert!(entry.idle_for() < Duration::from_secs(1));
    }
}
