//! Engine registry: one live swarm engine per content id.
//!
//! The registry is the only owner of engines. Creation is single-flight: the
//! first caller for a content id installs an `Opening` placeholder and spawns
//! the open, later callers wait on the same result. The map lock is a plain
//! `parking_lot::Mutex` held only around map mutations, never across `open`,
//! `close` or reads.

mod entry;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

pub use entry::{ActiveRead, EngineEntry};

use crate::config::RegistryConfig;
use crate::swarm::{ContentId, MagnetLink, SwarmBackend, SwarmEngine};

/// Errors raised while resolving an engine.
///
/// `Clone` so one open result can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Timed out after {timeout:?} waiting for metadata of {content_id}")]
    OpenTimeout {
        content_id: ContentId,
        timeout: Duration,
    },

    #[error("Failed to open {content_id}: {reason}")]
    OpenError {
        content_id: ContentId,
        reason: String,
    },

    #[error("No swarm engine is available in this deployment")]
    EngineUnavailable,
}

/// Result of one open attempt, `None` while still in flight.
type OpenOutcome = Option<Result<Arc<EngineEntry>, RegistryError>>;

enum Slot {
    Opening(watch::Receiver<OpenOutcome>),
    Ready(Arc<EngineEntry>),
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Ready entries with at least one response streaming
    pub active_entries: usize,
    /// Ready entries with no response streaming
    pub idle_entries: usize,
    /// Entries whose engine is still resolving metadata
    pub opening_entries: usize,
}

struct RegistryInner {
    backend: Option<Arc<dyn SwarmBackend>>,
    config: RegistryConfig,
    slots: Mutex<HashMap<ContentId, Slot>>,
    shutting_down: AtomicBool,
}

/// Shared handle to the engine map. Cheap to clone.
#[derive(Clone)]
pub struct EngineRegistry {
    inner: Arc<RegistryInner>,
}

impl EngineRegistry {
    /// Creates a registry that opens engines through `backend`.
    pub fn new(backend: Arc<dyn SwarmBackend>, config: RegistryConfig) -> Self {
        Self::build(Some(backend), config)
    }

    /// Creates a registry with no backend installed; every open fails with
    /// `RegistryError::EngineUnavailable`.
    pub fn unavailable(config: RegistryConfig) -> Self {
        Self::build(None, config)
    }

    fn build(backend: Option<Arc<dyn SwarmBackend>>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                config,
                slots: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Whether engines can be opened at all.
    pub fn is_available(&self) -> bool {
        self.inner.backend.is_some() && !self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns the entry for `magnet`, opening its engine if needed.
    ///
    /// Concurrent callers for the same content id share a single open. A
    /// caller that gives up waiting does not cancel the open for the others.
    ///
    /// # Errors
    ///
    /// - `RegistryError::EngineUnavailable` - No backend installed, or shutting down
    /// - `RegistryError::OpenTimeout` - Metadata not resolved within `open_timeout`
    /// - `RegistryError::OpenError` - Backend rejected the torrent
    pub async fn get_or_create(
        &self,
        magnet: &MagnetLink,
    ) -> Result<Arc<EngineEntry>, RegistryError> {
        let Some(backend) = self.inner.backend.clone() else {
            return Err(RegistryError::EngineUnavailable);
        };
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(RegistryError::EngineUnavailable);
        }

        let content_id = magnet.content_id();
        let mut receiver = {
            let mut slots = self.inner.slots.lock();
            match slots.get(content_id) {
                Some(Slot::Ready(entry)) => {
                    entry.touch();
                    return Ok(Arc::clone(entry));
                }
                Some(Slot::Opening(receiver)) => {
                    tracing::debug!("Joining in-flight open for {}", content_id.short());
                    receiver.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    slots.insert(content_id.clone(), Slot::Opening(receiver.clone()));
                    self.spawn_open(backend, magnet.clone(), sender);
                    receiver
                }
            }
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone());

        match outcome {
            Ok(Some(result)) => result,
            _ => {
                self.discard_placeholder(content_id, &receiver);
                Err(RegistryError::OpenError {
                    content_id: content_id.clone(),
                    reason: "open task ended without a result".to_string(),
                })
            }
        }
    }

    /// Drops an `Opening` slot whose open task died without publishing.
    fn discard_placeholder(
        &self,
        content_id: &ContentId,
        receiver: &watch::Receiver<OpenOutcome>,
    ) {
        let mut slots = self.inner.slots.lock();
        let orphaned = matches!(
            slots.get(content_id),
            Some(Slot::Opening(current)) if current.same_channel(receiver)
        );
        if orphaned {
            slots.remove(content_id);
            tracing::warn!("Removed orphaned open placeholder for {}", content_id);
        }
    }

    fn spawn_open(
        &self,
        backend: Arc<dyn SwarmBackend>,
        magnet: MagnetLink,
        sender: watch::Sender<OpenOutcome>,
    ) {
        let registry = self.clone();
        let timeout = self.inner.config.open_timeout;

        tokio::spawn(async move {
            let content_id = magnet.content_id().clone();
            let started = Instant::now();
            tracing::info!("Opening engine for {}", content_id);

            let attempt = AssertUnwindSafe(backend.open(&magnet)).catch_unwind();
            let opened = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(Ok(engine))) => Ok(engine),
                Ok(Ok(Err(error))) => Err(RegistryError::OpenError {
                    content_id: content_id.clone(),
                    reason: error.to_string(),
                }),
                Ok(Err(_)) => Err(RegistryError::OpenError {
                    content_id: content_id.clone(),
                    reason: "swarm backend panicked while opening".to_string(),
                }),
                Err(_) => Err(RegistryError::OpenTimeout {
                    content_id: content_id.clone(),
                    timeout,
                }),
            };

            let result = registry.publish(content_id, opened, started).await;
            // Waiters may all have gone away
            let _ = sender.send(Some(result));
        });
    }

    /// Replaces the placeholder with a ready entry, or removes it on failure.
    async fn publish(
        &self,
        content_id: ContentId,
        opened: Result<Box<dyn SwarmEngine>, RegistryError>,
        started: Instant,
    ) -> Result<Arc<EngineEntry>, RegistryError> {
        let engine = match opened {
            Ok(engine) => engine,
            Err(error) => {
                self.inner.slots.lock().remove(&content_id);
                tracing::warn!("{}", error);
                return Err(error);
            }
        };

        let entry = Arc::new(EngineEntry::new(content_id.clone(), engine));
        let published = {
            let mut slots = self.inner.slots.lock();
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                slots.remove(&content_id);
                false
            } else {
                slots.insert(content_id.clone(), Slot::Ready(Arc::clone(&entry)));
                true
            }
        };

        if !published {
            tracing::debug!("Discarding engine for {} opened during shutdown", content_id);
            entry.shut_down().await;
            return Err(RegistryError::EngineUnavailable);
        }

        self.start_progress_logger(&entry);
        tracing::info!(
            "Engine ready for {} ({:?}, {} files) in {:?}",
            content_id,
            entry.engine().name(),
            entry.engine().files().len(),
            started.elapsed()
        );
        Ok(entry)
    }

    /// Logs polled swarm progress until the entry goes away.
    fn start_progress_logger(&self, entry: &Arc<EngineEntry>) {
        let period = self.inner.config.progress_log_interval;
        if period.is_zero() {
            return;
        }

        let weak = Arc::downgrade(entry);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entry) = weak.upgrade() else {
                    break;
                };
                let progress = entry.engine().progress();
                tracing::debug!(
                    "Swarm {}: {:.1}% downloaded, {} B/s, {} peers ({} seeds), watched {:.0}%, {} active reads",
                    entry.content_id().short(),
                    progress.fraction_complete * 100.0,
                    progress.download_rate,
                    progress.peer_count,
                    progress.seed_count,
                    entry.watch_fraction() * 100.0,
                    entry.active_reads()
                );
            }
        });
        entry.set_progress_logger(handle);
    }

    /// Returns the ready entry for `content_id` without touching it.
    pub fn get(&self, content_id: &ContentId) -> Option<Arc<EngineEntry>> {
        match self.inner.slots.lock().get(content_id) {
            Some(Slot::Ready(entry)) => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    /// Whether a ready entry exists for `content_id`.
    pub fn contains(&self, content_id: &ContentId) -> bool {
        self.get(content_id).is_some()
    }

    /// Records watch progress for a ready entry.
    ///
    /// `fraction` is clamped to `[0, 1]` (NaN counts as 0) and the stored value
    /// only ever rises. Returns the stored fraction, or `None` when no ready
    /// entry exists for `content_id`.
    pub fn update_watch_fraction(&self, content_id: &ContentId, fraction: f64) -> Option<f64> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        let entry = self.get(content_id)?;
        let stored = entry.raise_watch_fraction(fraction);
        tracing::trace!(
            "Watch fraction for {} reported {:.3}, stored {:.3}",
            content_id.short(),
            fraction,
            stored
        );
        Some(stored)
    }

    /// Removes and closes every ready entry matching `predicate`.
    ///
    /// Entries are taken out of the map before their engines are closed, so a
    /// racing `get_or_create` never receives an engine that is being closed;
    /// it opens a fresh one instead. Returns the evicted content ids.
    pub async fn evict_if<F>(&self, mut predicate: F) -> Vec<ContentId>
    where
        F: FnMut(&EngineEntry) -> bool,
    {
        let evicted: Vec<Arc<EngineEntry>> = {
            let mut slots = self.inner.slots.lock();
            let mut matching = Vec::new();
            for (content_id, slot) in slots.iter() {
                if let Slot::Ready(entry) = slot {
                    if predicate(entry.as_ref()) {
                        matching.push(content_id.clone());
                    }
                }
            }

            matching
                .iter()
                .filter_map(|content_id| match slots.remove(content_id) {
                    Some(Slot::Ready(entry)) => Some(entry),
                    _ => None,
                })
                .collect()
        };

        for entry in &evicted {
            entry.shut_down().await;
            tracing::info!(
                "Evicted engine for {} (watched {:.0}%, idle {:?})",
                entry.content_id(),
                entry.watch_fraction() * 100.0,
                entry.idle_for()
            );
        }

        evicted
            .iter()
            .map(|entry| entry.content_id().clone())
            .collect()
    }

    /// Removes and closes one entry. Returns whether it existed.
    pub async fn remove(&self, content_id: &ContentId) -> bool {
        !self
            .evict_if(|entry| entry.content_id() == content_id)
            .await
            .is_empty()
    }

    /// Current occupancy.
    pub fn stats(&self) -> RegistryStats {
        let slots = self.inner.slots.lock();
        let mut stats = RegistryStats::default();
        for slot in slots.values() {
            match slot {
                Slot::Opening(_) => stats.opening_entries += 1,
                Slot::Ready(entry) if entry.active_reads() > 0 => stats.active_entries += 1,
                Slot::Ready(_) => stats.idle_entries += 1,
            }
        }
        stats
    }

    /// Number of entries, ready or opening.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses new opens and closes every ready engine.
    ///
    /// Opens still in flight close their engine when they complete.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let closed = self.evict_if(|_| true).await;
        tracing::info!("Engine registry shut down, closed {} engines", closed.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::swarm::{SimulatedSwarm, SimulatedTorrent};

    fn registry_with(swarm: &SimulatedSwarm) -> EngineRegistry {
        EngineRegistry::new(
            Arc::new(swarm.clone()),
            RegistryConfig {
                open_timeout: Duration::from_millis(200),
                progress_log_interval: Duration::from_secs(3600),
            },
        )
    }

    fn test_swarm() -> (SimulatedSwarm, MagnetLink) {
        let swarm = SimulatedSwarm::new(SimulationConfig {
            open_latency: Duration::from_millis(5),
            read_chunk_delay: Duration::ZERO,
        });
        let content_id = swarm.add_torrent(SimulatedTorrent::new("registry").with_file("a.mp4", 100));
        (swarm, MagnetLink::from(content_id))
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_entry() {
        let (swarm, magnet) = test_swarm();
        let registry = registry_with(&swarm);

        let first = registry.get_or_create(&magnet).await.unwrap();
        let second = registry.get_or_create(&magnet).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(swarm.open_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_registry_fails_fast() {
        let registry = EngineRegistry::unavailable(RegistryConfig::default());
        let magnet = MagnetLink::from(ContentId::from_info_hash([1u8; 20]));

        assert!(!registry.is_available());
        assert!(matches!(
            registry.get_or_create(&magnet).await,
            Err(RegistryError::EngineUnavailable)
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_open_times_out_and_cleans_up() {
        let (swarm, _) = test_swarm();
        let registry = registry_with(&swarm);
        let unknown = MagnetLink::from(ContentId::from_info_hash([7u8; 20]));

        let result = registry.get_or_create(&unknown).await;

        assert!(matches!(result, Err(RegistryError::OpenTimeout { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_update_watch_fraction_clamps() {
        let (swarm, magnet) = test_swarm();
        let registry = registry_with(&swarm);
        registry.get_or_create(&magnet).await.unwrap();
        let content_id = magnet.content_id();

        assert_eq!(registry.update_watch_fraction(content_id, f64::NAN), Some(0.0));
        assert_eq!(registry.update_watch_fraction(content_id, 3.0), Some(1.0));
        assert_eq!(registry.update_watch_fraction(content_id, 0.2), Some(1.0));

        let missing = ContentId::from_info_hash([2u8; 20]);
        assert_eq!(registry.update_watch_fraction(&missing, 0.5), None);
    }

    #[tokio::test]
    async fn test_evict_if_closes_matching_engines() {
        let (swarm, magnet) = test_swarm();
        let registry = registry_with(&swarm);
        let entry = registry.get_or_create(&magnet).await.unwrap();

        let evicted = registry.evict_if(|_| true).await;

        assert_eq!(evicted, vec![magnet.content_id().clone()]);
        assert!(!registry.contains(magnet.content_id()));
        assert_eq!(swarm.close_count(), 1);
        // A held Arc outlives eviction but the engine is closed
        assert!(entry.engine().read_range(0, 0, 1).await.is_err());

        registry.get_or_create(&magnet).await.unwrap();
        assert_eq!(swarm.open_count(), 2);
    }

    #[tokio::test]
    async fn test_stats_counts_active_and_idle() {
        let (swarm, magnet) = test_swarm();
        let other = swarm.add_torrent(SimulatedTorrent::new("other").with_file("b.mkv", 10));
        let registry = registry_with(&swarm);

        let entry = registry.get_or_create(&magnet).await.unwrap();
        registry.get_or_create(&MagnetLink::from(other)).await.unwrap();
        let read = entry.begin_read(10);

        assert_eq!(
            registry.stats(),
            RegistryStats {
                active_entries: 1,
                idle_entries: 1,
                opening_entries: 0,
            }
        );
        drop(read);
        assert_eq!(registry.stats().idle_entries, 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_engines_and_refuses_opens() {
        let (swarm, magnet) = test_swarm();
        let registry = registry_with(&swarm);
        registry.get_or_create(&magnet).await.unwrap();

        registry.shutdown().await;

        assert!(registry.is_empty());
        assert_eq!(swarm.close_count(), 1);
        assert!(matches!(
            registry.get_or_create(&magnet).await,
            Err(RegistryError::EngineUnavailable)
        ));
    }
}
