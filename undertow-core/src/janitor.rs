//! Background eviction of cached engines.
//!
//! Two independent periodic passes share one registry:
//!
//! - the idle sweep drops engines that were opened (usually by an info
//!   lookup) but never streamed nor watched, once they have sat unused past
//!   a short threshold;
//! - the retention sweep drops finished content right away and unfinished
//!   content after a long retention window.
//!
//! Neither pass evicts an entry while a response is streaming from it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::JanitorConfig;
use crate::registry::{EngineEntry, EngineRegistry};
use crate::swarm::ContentId;

/// Why an entry was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Watched at or past the finished fraction
    Finished,
    /// Not accessed within the retention window
    Stale,
    /// Opened but never used
    Idle,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Stale => write!(f, "stale"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Retention rule applied by the long sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub finished_fraction: f64,
    pub max_age: Duration,
}

impl RetentionPolicy {
    /// Decides whether an entry with the given watch state should go.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use undertow_core::janitor::{EvictionReason, RetentionPolicy};
    ///
    /// let policy = RetentionPolicy {
    ///     finished_fraction: 0.9,
    ///     max_age: Duration::from_secs(24 * 3600),
    /// };
    /// assert_eq!(policy.evaluate(0.95, Duration::ZERO), Some(EvictionReason::Finished));
    /// assert_eq!(policy.evaluate(0.3, Duration::from_secs(3600)), None);
    /// ```
    pub fn evaluate(&self, watch_fraction: f64, since_access: Duration) -> Option<EvictionReason> {
        if watch_fraction >= self.finished_fraction {
            Some(EvictionReason::Finished)
        } else if since_access > self.max_age {
            Some(EvictionReason::Stale)
        } else {
            None
        }
    }
}

impl From<&JanitorConfig> for RetentionPolicy {
    fn from(config: &JanitorConfig) -> Self {
        Self {
            finished_fraction: config.finished_fraction,
            max_age: config.retention_max_age,
        }
    }
}

/// Runs the idle and retention sweeps against a registry.
#[derive(Clone)]
pub struct CacheJanitor {
    registry: EngineRegistry,
    config: JanitorConfig,
}

impl CacheJanitor {
    pub fn new(registry: EngineRegistry, config: JanitorConfig) -> Self {
        Self { registry, config }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from(&self.config)
    }

    fn is_abandoned(&self, entry: &EngineEntry) -> bool {
        entry.active_reads() == 0
            && entry.reads_started() == 0
            && entry.watch_fraction() == 0.0
            && entry.idle_for() > self.config.idle_threshold
    }

    /// Evicts entries opened but never streamed or watched. Returns the evicted ids.
    pub async fn run_idle_sweep(&self) -> Vec<ContentId> {
        let evicted = self
            .registry
            .evict_if(|entry| {
                let abandoned = self.is_abandoned(entry);
                if abandoned {
                    log_eviction(entry, EvictionReason::Idle);
                }
                abandoned
            })
            .await;

        tracing::debug!(
            "Idle sweep evicted {} engines, {} remain",
            evicted.len(),
            self.registry.len()
        );
        evicted
    }

    /// Evicts finished or stale entries that nobody is streaming. Returns the evicted ids.
    pub async fn run_retention_sweep(&self) -> Vec<ContentId> {
        let policy = self.retention_policy();
        let evicted = self
            .registry
            .evict_if(|entry| {
                let Some(reason) = policy.evaluate(entry.watch_fraction(), entry.idle_for()) else {
                    return false;
                };
                if entry.active_reads() > 0 {
                    tracing::debug!(
                        "Deferring {} eviction of {}: {} reads in flight",
                        reason,
                        entry.content_id().short(),
                        entry.active_reads()
                    );
                    return false;
                }
                log_eviction(entry, reason);
                true
            })
            .await;

        tracing::info!(
            "Retention sweep evicted {} engines, {} remain",
            evicted.len(),
            self.registry.len()
        );
        evicted
    }

    /// Starts both sweeps on their own timers.
    pub fn spawn(self) -> JanitorHandle {
        tracing::info!(
            "Cache janitor started: idle sweep every {:?} (threshold {:?}), retention sweep every {:?} (max age {:?}, finished at {:.0}%)",
            self.config.idle_sweep_interval,
            self.config.idle_threshold,
            self.config.retention_sweep_interval,
            self.config.retention_max_age,
            self.config.finished_fraction * 100.0
        );

        let idle_janitor = self.clone();
        let idle = tokio::spawn(async move {
            let mut interval = sweep_interval(idle_janitor.config.idle_sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                idle_janitor.run_idle_sweep().await;
            }
        });

        let retention = tokio::spawn(async move {
            let mut interval = sweep_interval(self.config.retention_sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.run_retention_sweep().await;
            }
        });

        JanitorHandle { idle, retention }
    }
}

fn sweep_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn log_eviction(entry: &EngineEntry, reason: EvictionReason) {
    tracing::info!(
        "Evicting {} ({}): watched {:.0}%, idle {:?}, age {:?}",
        entry.content_id(),
        reason,
        entry.watch_fraction() * 100.0,
        entry.idle_for(),
        entry.created_at().elapsed()
    );
}

/// Owns the sweep tasks; dropping it stops them.
pub struct JanitorHandle {
    idle: JoinHandle<()>,
    retention: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stops both sweeps.
    pub fn shutdown(self) {
        tracing::info!("Cache janitor stopped");
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.idle.abort();
        self.retention.abort();
    }
}
