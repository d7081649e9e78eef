//! # Download Task Coordinator
//!
//! Sole owner of in-flight download state. Every record maps an asset id to
//! the native task handle the engine gave us; a second index maps handles
//! back to asset ids so engine callbacks can be routed.
//!
//! The coordinator is not synchronized itself. [`crate::OfflineManager`]
//! keeps it behind the mutation lock.

use bridge_traits::{BridgeError, DownloadEngine, TaskHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::asset::{Asset, AssetId};
use crate::error::{OfflineError, Result};
use crate::progress;

/// In-memory state of one running download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub asset: Asset,
    pub handle: TaskHandle,
    /// Fraction in `[0, 1]`, never decreasing
    pub progress: f64,
    /// Set once an abort was issued; the record stays until the engine confirms.
    pub cancel_requested: bool,
    /// Re-adopted from the engine at startup rather than submitted by us
    pub restored: bool,
    awaiting_abort: bool,
    generation: u64,
}

impl DownloadRecord {
    /// Distinguishes this record from a later download of the same asset.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// Abort issued; the engine's completion callback will finish the job.
    Issued { generation: u64 },
    /// An abort was already pending for this record.
    AlreadyPending,
    /// The engine no longer knows the task, so the record was dropped.
    Orphaned,
}

/// Progress stored for a record after an engine report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub asset_id: AssetId,
    pub progress: f64,
    /// `false` when the report did not move progress forward
    pub advanced: bool,
}

pub struct DownloadCoordinator {
    engine: Arc<dyn DownloadEngine>,
    records: HashMap<AssetId, DownloadRecord>,
    by_handle: HashMap<TaskHandle, AssetId>,
    next_generation: u64,
}

impl DownloadCoordinator {
    pub fn new(engine: Arc<dyn DownloadEngine>) -> Self {
        Self {
            engine,
            records: HashMap::new(),
            by_handle: HashMap::new(),
            next_generation: 0,
        }
    }

    fn insert(&mut self, asset: Asset, handle: TaskHandle, restored: bool) {
        self.next_generation += 1;
        let id = asset.id.clone();
        if let Some(previous) = self.by_handle.insert(handle, id.clone()) {
            warn!(handle = %handle, previous = %previous, asset_id = %id, "Engine reused a live task handle");
            self.records.remove(&previous);
        }
        self.records.insert(
            id,
            DownloadRecord {
                asset,
                handle,
                progress: 0.0,
                cancel_requested: false,
                restored,
                awaiting_abort: false,
                generation: self.next_generation,
            },
        );
    }

    fn detach(&mut self, id: &AssetId) -> Option<DownloadRecord> {
        let record = self.records.remove(id)?;
        self.by_handle.remove(&record.handle);
        Some(record)
    }

    /// Submit a native task for `asset`.
    ///
    /// Downloads are deduplicated by asset id: a second start while the first
    /// is running is rejected, never queued or restarted.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub async fn start(&mut self, asset: Asset) -> Result<TaskHandle> {
        if self.records.contains_key(&asset.id) {
            return Err(OfflineError::AlreadyInFlight(asset.id));
        }

        let handle = self
            .engine
            .submit(&asset.source, asset.id.as_str())
            .await
            .map_err(|e| OfflineError::from_engine(&asset.id, e))?;

        info!(handle = %handle, "Download task submitted");
        self.insert(asset, handle, false);
        Ok(handle)
    }

    /// Ask the engine to abort the task for `id`.
    ///
    /// The record is kept: only the completion callback removes it, so the
    /// engine never holds a live handle we have forgotten. While an abort is
    /// awaiting acknowledgement further requests are no-ops; once it has
    /// [expired](Self::expire_cancel) the next request aborts again.
    #[instrument(skip(self))]
    pub async fn cancel(&mut self, id: &AssetId) -> Result<CancelRequest> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| OfflineError::NotInFlight(id.clone()))?;

        if record.awaiting_abort {
            debug!("Cancellation already pending");
            return Ok(CancelRequest::AlreadyPending);
        }

        let handle = record.handle;
        match self.engine.abort(handle).await {
            Ok(()) => {}
            Err(BridgeError::UnknownTask(_)) => {
                warn!(handle = %handle, "Engine has no such task, dropping record");
                self.detach(id);
                return Ok(CancelRequest::Orphaned);
            }
            Err(e) => return Err(OfflineError::from_engine(id, e)),
        }

        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| OfflineError::NotInFlight(id.clone()))?;
        record.cancel_requested = true;
        record.awaiting_abort = true;
        info!(handle = %handle, "Abort issued");

        Ok(CancelRequest::Issued {
            generation: record.generation,
        })
    }

    /// Remove and return the record for a finished task.
    pub fn complete(&mut self, handle: TaskHandle) -> Option<DownloadRecord> {
        let id = self.by_handle.get(&handle)?.clone();
        self.detach(&id)
    }

    /// Record a progress report; `None` for unknown handles.
    pub fn update_progress(&mut self, handle: TaskHandle, reported: f64) -> Option<ProgressUpdate> {
        let id = self.by_handle.get(&handle)?;
        let record = self.records.get_mut(id)?;

        let next = progress::advance(record.progress, reported);
        let advanced = next > record.progress;
        record.progress = next;

        Some(ProgressUpdate {
            asset_id: id.clone(),
            progress: next,
            advanced,
        })
    }

    /// Take over a task the engine was already running. Never submits.
    ///
    /// Returns `false` when the asset id or the handle is already tracked.
    pub fn adopt(&mut self, asset: Asset, handle: TaskHandle) -> bool {
        if self.records.contains_key(&asset.id) || self.by_handle.contains_key(&handle) {
            return false;
        }
        self.insert(asset, handle, true);
        true
    }

    pub fn record(&self, id: &AssetId) -> Option<&DownloadRecord> {
        self.records.get(id)
    }

    pub fn is_in_flight(&self, id: &AssetId) -> bool {
        self.records.contains_key(id)
    }

    /// Whether the record identified by `generation` is still waiting on an abort.
    pub fn cancel_pending(&self, id: &AssetId, generation: u64) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| record.generation == generation && record.awaiting_abort)
    }

    /// Stop waiting on an unacknowledged abort so it can be issued again.
    ///
    /// Returns `true` if the abort identified by `generation` was still pending.
    pub fn expire_cancel(&mut self, id: &AssetId, generation: u64) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.generation == generation && record.awaiting_abort => {
                record.awaiting_abort = false;
                true
            }
            _ => false,
        }
    }

    /// In-flight assets with their progress, sorted by id.
    pub fn active(&self) -> Vec<(Asset, f64)> {
        let mut active: Vec<(Asset, f64)> = self
            .records
            .values()
            .map(|record| (record.asset.clone(), record.progress))
            .collect();
        active.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        active
    }

    /// Sorted ids of in-flight assets starting with `prefix`.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self
            .records
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
