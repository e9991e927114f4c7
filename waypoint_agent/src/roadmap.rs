//! Roadmap tracker.
//!
//! Keeps a user's progress through the four pillars. Progress only grows,
//! is clamped at 100, and the current pillar advances forward when it is
//! completed.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use waypoint_core::{Pillar, Result, RoadmapProgress, RoadmapStore};

/// Upper bound of a pillar's progress.
pub const MAX_PROGRESS: u8 = 100;

/// Read-modify-write access to roadmap progress.
///
/// Updates are serialised through an async mutex so that concurrent
/// increments for the same user are not lost.
pub struct RoadmapTracker {
    store: Arc<dyn RoadmapStore>,
    write_lock: Mutex<()>,
}

impl RoadmapTracker {
    pub fn new(store: Arc<dyn RoadmapStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the user's progress, creating a fresh record on first use.
    pub async fn get_progress(&self, user_id: &str) -> Result<RoadmapProgress> {
        if let Some(progress) = self.store.load_progress(user_id).await? {
            return Ok(progress);
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have created it while we waited
        if let Some(progress) = self.store.load_progress(user_id).await? {
            return Ok(progress);
        }
        let progress = RoadmapProgress::new(user_id);
        self.store.save_progress(&progress).await?;
        tracing::debug!(user_id, "created roadmap");
        Ok(progress)
    }

    /// Adds `increment` to a pillar and merges `metadata` into it.
    ///
    /// When the updated pillar is the current one and reaches 100, the
    /// current pillar moves to the next in order. The last pillar stays put.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the roadmap
    /// * `pillar` - Pillar to credit
    /// * `increment` - Amount to add; the result is clamped at 100
    /// * `metadata` - Keys overwrite existing metadata keys of the pillar
    pub async fn update_progress(
        &self,
        user_id: &str,
        pillar: Pillar,
        increment: u32,
        metadata: Map<String, Value>,
    ) -> Result<RoadmapProgress> {
        let _guard = self.write_lock.lock().await;

        let mut progress = match self.store.load_progress(user_id).await? {
            Some(progress) => progress,
            None => RoadmapProgress::new(user_id),
        };

        let state = progress.pillar_mut(pillar);
        let total = u32::from(state.progress).saturating_add(increment);
        state.progress = u8::try_from(total.min(u32::from(MAX_PROGRESS))).unwrap_or(MAX_PROGRESS);
        state.metadata.extend(metadata);
        let reached = state.progress;

        if pillar == progress.current_pillar && reached >= MAX_PROGRESS {
            if let Some(next) = pillar.next() {
                progress.current_pillar = next;
                tracing::info!(user_id, from = pillar.as_str(), to = next.as_str(), "pillar advanced");
            }
        }

        progress.updated_at = Utc::now();
        self.store.save_progress(&progress).await?;
        tracing::debug!(user_id, pillar = pillar.as_str(), progress = reached, "progress updated");
        Ok(progress)
    }

    /// Mean progress over all pillars, for display.
    pub async fn get_overall_progress(&self, user_id: &str) -> Result<f64> {
        Ok(self.get_progress(user_id).await?.overall())
    }
}

impl std::fmt::Debug for RoadmapTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoadmapTracker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::{MemoryStore, NullStore};

    fn tracker() -> RoadmapTracker {
        RoadmapTracker::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_fresh_roadmap() {
        let tracker = tracker();
        let progress = tracker.get_progress("u1").await.unwrap();
        assert_eq!(progress.current_pillar, Pillar::Discovery);
        assert!(Pillar::ALL.iter().all(|p| progress.progress(*p) == 0));
        assert_eq!(tracker.get_overall_progress("u1").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_clamped_and_advanced() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker
                .update_progress("u1", Pillar::Discovery, 40, Map::new())
                .await
                .unwrap();
        }

        let progress = tracker.get_progress("u1").await.unwrap();
        assert_eq!(progress.progress(Pillar::Discovery), 100);
        assert_eq!(progress.current_pillar, Pillar::GapAnalysis);
    }

    #[tokio::test]
    async fn test_non_current_pillar_does_not_advance() {
        let tracker = tracker();
        let progress = tracker
            .update_progress("u1", Pillar::Strategy, 100, Map::new())
            .await
            .unwrap();
        assert_eq!(progress.progress(Pillar::Strategy), 100);
        assert_eq!(progress.current_pillar, Pillar::Discovery);
    }

    #[tokio::test]
    async fn test_metadata_merges() {
        let tracker = tracker();
        let first = json!({ "source": "chat", "count": 1 });
        let second = json!({ "count": 2 });
        tracker
            .update_progress("u1", Pillar::Discovery, 5, first.as_object().cloned().unwrap())
            .await
            .unwrap();
        let progress = tracker
            .update_progress("u1", Pillar::Discovery, 5, second.as_object().cloned().unwrap())
            .await
            .unwrap();

        let metadata = &progress.pillar(Pillar::Discovery).metadata;
        assert_eq!(metadata["source"], json!("chat"));
        assert_eq!(metadata["count"], json!(2));
        assert_eq!(progress.progress(Pillar::Discovery), 10);
    }

    #[tokio::test]
    async fn test_null_store_never_remembers() {
        let tracker = RoadmapTracker::new(Arc::new(NullStore));
        tracker
            .update_progress("u1", Pillar::Discovery, 50, Map::new())
            .await
            .unwrap();
        assert_eq!(tracker.get_progress("u1").await.unwrap().progress(Pillar::Discovery), 0);
    }
}
