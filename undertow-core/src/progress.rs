//! Client-reported watch progress.
//!
//! The playback client is the only source of watch progress; download
//! progress reported by the swarm never feeds into it.

use serde::Serialize;

use crate::registry::EngineRegistry;
use crate::swarm::ContentId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    #[error("Invalid progress: {reason}")]
    InvalidProgress { reason: String },
}

/// Outcome of one progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub content_id: ContentId,
    /// Value the client sent
    pub progress: f64,
    /// Fraction now stored for eviction, `None` if no engine is cached
    pub watch_fraction: Option<f64>,
}

/// Validates progress reports and forwards them to the registry.
#[derive(Clone)]
pub struct ProgressTracker {
    registry: EngineRegistry,
}

impl ProgressTracker {
    pub fn new(registry: EngineRegistry) -> Self {
        Self { registry }
    }

    /// Records that the client has watched `progress` of `content_id`.
    ///
    /// Reports for content without a cached engine are accepted and dropped;
    /// there is nothing to keep warm.
    ///
    /// # Errors
    ///
    /// - `ProgressError::InvalidProgress` - `progress` is not a finite number in `[0, 1]`
    pub fn report(
        &self,
        content_id: &ContentId,
        progress: f64,
    ) -> Result<ProgressReport, ProgressError> {
        validate(progress)?;

        let watch_fraction = self.registry.update_watch_fraction(content_id, progress);
        if watch_fraction.is_none() {
            tracing::debug!(
                "Progress {:.3} for {} ignored, no cached engine",
                progress,
                content_id.short()
            );
        }

        Ok(ProgressReport {
            content_id: content_id.clone(),
            progress,
            watch_fraction,
        })
    }
}

fn validate(progress: f64) -> Result<(), ProgressError> {
    if !progress.is_finite() {
        return Err(ProgressError::InvalidProgress {
            reason: format!("{progress} is not a finite number"),
        });
    }
    if !(0.0..=1.0).contains(&progress) {
        return Err(ProgressError::InvalidProgress {
            reason: format!("{progress} is outside [0, 1]"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::{RegistryConfig, SimulationConfig};
    use crate::swarm::{MagnetLink, SimulatedSwarm, SimulatedTorrent};

    async fn tracker_with_entry() -> (ProgressTracker, EngineRegistry, ContentId) {
        let swarm = SimulatedSwarm::new(SimulationConfig {
            open_latency: Duration::ZERO,
            read_chunk_delay: Duration::ZERO,
        });
        let content_id = swarm.add_torrent(SimulatedTorrent::new("progress").with_file("a.mp4", 10));
        let registry = EngineRegistry::new(Arc::new(swarm), RegistryConfig::default());
        registry
            .get_or_create(&MagnetLink::from(content_id.clone()))
            .await
            .unwrap();
        (ProgressTracker::new(registry.clone()), registry, content_id)
    }

    #[tokio::test]
    async fn test_report_raises_watch_fraction() {
        let (tracker, registry, content_id) = tracker_with_entry().await;

        let report = tracker.report(&content_id, 0.6).unwrap();
        assert_eq!(report.watch_fraction, Some(0.6));

        let rewind = tracker.report(&content_id, 0.1).unwrap();
        assert_eq!(rewind.progress, 0.1);
        assert_eq!(rewind.watch_fraction, Some(0.6));
        assert_eq!(registry.get(&content_id).unwrap().watch_fraction(), 0.6);
    }

    #[tokio::test]
    async fn test_invalid_progress_leaves_state_untouched() {
        let (tracker, registry, content_id) = tracker_with_entry().await;
        tracker.report(&content_id, 0.4).unwrap();

        for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                tracker.report(&content_id, bad),
                Err(ProgressError::InvalidProgress { .. })
            ));
        }
        assert_eq!(registry.get(&content_id).unwrap().watch_fraction(), 0.4);
    }

    #[tokio::test]
    async fn test_report_without_entry_is_accepted() {
        let (tracker, _registry, _) = tracker_with_entry().await;
        let unknown = ContentId::from_info_hash([3u8; 20]);

        let report = tracker.report(&unknown, 0.5).unwrap();
        assert_eq!(report.watch_fraction, None);
    }
}
