//! # State Reconciler
//!
//! Runs once per process at startup. Asks the engine which tasks it is still
//! tracking (they survived a restart) and re-adopts them into the coordinator
//! without submitting anything new.

use bridge_traits::DownloadEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument, warn};

use crate::asset::{Asset, AssetId};
use crate::coordinator::DownloadCoordinator;
use crate::error::Result;
use crate::lifecycle::AssetLifecycle;

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tasks re-adopted as in-flight downloads
    pub adopted: Vec<AssetId>,
    /// Tasks ignored because their asset is already downloaded
    pub superseded: Vec<AssetId>,
    /// Tasks without a usable tag
    pub untagged: usize,
    /// Tasks whose asset id or handle was already adopted
    pub duplicates: usize,
    /// Persisted downloads whose storage still exists after the pass
    pub completed: usize,
}

#[derive(Debug, Default)]
pub struct StateReconciler {
    done: AtomicBool,
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Rebuild in-flight state from the engine's task list.
    ///
    /// Returns `None` if a previous pass already succeeded. A failed pass
    /// adopts nothing and releases the latch so it can be retried.
    #[instrument(skip_all)]
    pub async fn reconcile(
        &self,
        engine: &dyn DownloadEngine,
        coordinator: &mut DownloadCoordinator,
        lifecycle: &AssetLifecycle,
    ) -> Result<Option<ReconcileReport>> {
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }

        match Self::run(engine, coordinator, lifecycle).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                self.done.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn run(
        engine: &dyn DownloadEngine,
        coordinator: &mut DownloadCoordinator,
        lifecycle: &AssetLifecycle,
    ) -> Result<ReconcileReport> {
        let tasks = engine.enumerate_known_tasks().await?;
        let mut report = ReconcileReport::default();
        let mut candidates = Vec::with_capacity(tasks.len());

        for task in tasks {
            let Some(tag) = task.tag.filter(|tag| !tag.is_empty()) else {
                warn!(handle = %task.handle, "Engine task has no asset tag, skipping");
                report.untagged += 1;
                continue;
            };
            let id = AssetId::from(tag);

            // Never let an asset be both downloaded and downloading.
            if lifecycle.resolve_entry(&id).await?.is_some() {
                warn!(asset_id = %id, handle = %task.handle, "Task superseded by finished download, ignoring");
                report.superseded.push(id);
                continue;
            }

            candidates.push((Asset::new(id, task.source), task.handle));
        }

        report.completed = lifecycle.completed().await?.len();

        // Nothing below can fail, so a pass either adopts everything or nothing.
        for (asset, handle) in candidates {
            let id = asset.id.clone();
            if coordinator.adopt(asset, handle) {
                report.adopted.push(id);
            } else {
                warn!(asset_id = %id, handle = %handle, "Duplicate engine task, ignoring");
                report.duplicates += 1;
            }
        }

        info!(
            adopted = report.adopted.len(),
            superseded = report.superseded.len(),
            untagged = report.untagged,
            completed = report.completed,
            "Download state reconciled"
        );
        Ok(report)
    }
}
