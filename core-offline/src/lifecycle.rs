//! # Asset Lifecycle Manager
//!
//! Combines the persisted locations with the coordinator's in-flight records
//! into the state callers see, turns engine outcomes into persisted entries
//! and events, and deletes finished downloads.
//!
//! Persisted entries are checked against the file system whenever they are
//! read. An entry whose storage vanished (or whose blob no longer decodes) is
//! removed on the spot and the asset reads as not downloaded.

use bridge_traits::{EngineFailureKind, EngineOutcome, FileSystemAccess};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_runtime::logging::strip_path;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::asset::{Asset, AssetId, DerivedState};
use crate::coordinator::{DownloadCoordinator, DownloadRecord};
use crate::error::{OfflineError, Result};
use crate::store::{LocationStore, PersistedEntry};

/// A persisted entry whose storage was found on disk.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry: PersistedEntry,
    pub path: PathBuf,
}

pub struct AssetLifecycle {
    store: LocationStore,
    fs: Arc<dyn FileSystemAccess>,
    events: EventBus,
    environment_fault_reported: AtomicBool,
}

impl AssetLifecycle {
    pub fn new(store: LocationStore, fs: Arc<dyn FileSystemAccess>, events: EventBus) -> Self {
        Self {
            store,
            fs,
            events,
            environment_fault_reported: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Publish a download event. Having no subscribers is fine.
    pub fn emit(&self, event: DownloadEvent) {
        let _ = self.events.emit(CoreEvent::Download(event));
    }

    pub fn emit_state(&self, id: &AssetId, state: DerivedState) {
        self.emit(DownloadEvent::StateChanged {
            asset_id: id.to_string(),
            state: state.download_state(),
            progress: state.progress(),
        });
    }

    /// Report that this environment cannot download adaptive streams.
    ///
    /// Emitted at most once per lifecycle; returns whether this call emitted it.
    pub fn report_environment_fault(&self, asset_id: Option<&AssetId>, message: &str) -> bool {
        if self.environment_fault_reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        error!(reason = message, "Offline downloads unsupported in this environment");
        self.emit(DownloadEvent::Error {
            asset_id: asset_id.map(ToString::to_string),
            message: format!("Offline downloads unsupported in this environment: {}", message),
            recoverable: false,
        });
        true
    }

    /// Load and verify the persisted entry for `id`, healing it if stale.
    pub async fn resolve_entry(&self, id: &AssetId) -> Result<Option<ResolvedEntry>> {
        let entry = match self.store.get(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(OfflineError::Serialization(e)) => {
                warn!(asset_id = %id, error = %e, "Discarding undecodable download entry");
                self.heal(id).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match self.store.resolve(&entry.token).await {
            Ok(path) => Ok(Some(ResolvedEntry { entry, path })),
            Err(OfflineError::StaleLocation { path }) => {
                warn!(
                    asset_id = %id,
                    location = %strip_path(&path.to_string_lossy()),
                    "Downloaded storage disappeared, clearing entry"
                );
                self.heal(id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn heal(&self, id: &AssetId) -> Result<()> {
        self.store.remove(id).await?;
        self.emit_state(id, DerivedState::NotDownloaded);
        Ok(())
    }

    /// Visible state of `id`. Persisted state wins over in-flight state.
    pub async fn state_of(
        &self,
        coordinator: &DownloadCoordinator,
        id: &AssetId,
    ) -> Result<DerivedState> {
        if self.resolve_entry(id).await?.is_some() {
            return Ok(DerivedState::Downloaded);
        }

        Ok(match coordinator.record(id) {
            Some(record) => DerivedState::Downloading {
                progress: record.progress,
            },
            None => DerivedState::NotDownloaded,
        })
    }

    /// Apply the terminal outcome of a task whose record was already removed.
    ///
    /// Never fails: problems become events.
    #[instrument(skip(self, record), fields(asset_id = %record.asset.id, handle = %record.handle))]
    pub async fn finalize(&self, record: DownloadRecord, outcome: EngineOutcome) {
        let id = record.asset.id.clone();

        match outcome {
            EngineOutcome::Finished { location } => {
                if let Err(e) = self.persist(&record.asset, &location).await {
                    error!(error = %e, "Failed to persist finished download");
                    // Nothing will ever point at the package again.
                    if let Err(remove_error) = self.fs.remove_path(&location).await {
                        if !remove_error.is_not_found() {
                            warn!(error = %remove_error, "Failed to remove unrecorded download");
                        }
                    }
                    self.emit_state(&id, DerivedState::NotDownloaded);
                    self.emit(DownloadEvent::Error {
                        asset_id: Some(id.to_string()),
                        message: format!("Failed to record downloaded location: {}", e),
                        recoverable: true,
                    });
                    return;
                }
                info!(location = %strip_path(&location.to_string_lossy()), "Download finished");
                self.emit_state(&id, DerivedState::Downloaded);
            }
            EngineOutcome::Cancelled => {
                info!("Download cancelled");
                self.emit_state(&id, DerivedState::NotDownloaded);
            }
            EngineOutcome::Failed(failure) => match failure.kind {
                EngineFailureKind::EnvironmentUnsupported => {
                    self.emit_state(&id, DerivedState::NotDownloaded);
                    self.report_environment_fault(Some(&id), &failure.message);
                }
                EngineFailureKind::UserAborted => {
                    info!("Download aborted by user");
                    self.emit_state(&id, DerivedState::NotDownloaded);
                }
                _ if record.cancel_requested => {
                    debug!(reason = %failure.message, "Failure after abort, treating as cancellation");
                    self.emit_state(&id, DerivedState::NotDownloaded);
                }
                EngineFailureKind::Transfer | EngineFailureKind::Unknown => {
                    warn!(kind = ?failure.kind, reason = %failure.message, "Download failed");
                    self.emit_state(&id, DerivedState::NotDownloaded);
                    let error = OfflineError::EngineError {
                        asset_id: id.clone(),
                        message: failure.message,
                    };
                    self.emit(DownloadEvent::Error {
                        asset_id: Some(id.to_string()),
                        message: error.to_string(),
                        recoverable: error.is_recoverable(),
                    });
                }
            },
        }
    }

    async fn persist(&self, asset: &Asset, location: &std::path::Path) -> Result<()> {
        let token = self.store.token_for(location).await?;
        self.store.put(asset, token).await?;
        Ok(())
    }

    /// Delete a finished download: storage first, then the entry.
    ///
    /// A crash between the two steps leaves an entry pointing at nothing,
    /// which the next lookup heals.
    #[instrument(skip(self, coordinator))]
    pub async fn delete(&self, coordinator: &DownloadCoordinator, id: &AssetId) -> Result<()> {
        if coordinator.is_in_flight(id) {
            return Err(OfflineError::NotFound(id.clone()));
        }

        let Some(resolved) = self.resolve_entry(id).await? else {
            return Err(OfflineError::NotFound(id.clone()));
        };

        match self.fs.remove_path(&resolved.path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Storage already gone");
            }
            Err(e) => {
                error!(error = %e, "Failed to remove downloaded storage");
                return Err(OfflineError::Io(format!(
                    "failed to remove {}: {}",
                    strip_path(&resolved.path.to_string_lossy()),
                    e
                )));
            }
        }

        self.store.remove(id).await?;
        info!("Download deleted");
        self.emit_state(id, DerivedState::NotDownloaded);
        Ok(())
    }

    /// Every verified, downloaded asset, sorted by id.
    pub async fn completed(&self) -> Result<Vec<Asset>> {
        let mut assets = Vec::new();
        for id in self.store.asset_ids().await? {
            if let Some(resolved) = self.resolve_entry(&id).await? {
                assets.push(resolved.entry.asset);
            }
        }
        Ok(assets)
    }

    /// Ids of persisted entries starting with `prefix`, without verifying storage.
    pub async fn persisted_ids_with_prefix(&self, prefix: &str) -> Result<Vec<AssetId>> {
        Ok(self
            .store
            .asset_ids()
            .await?
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect())
    }

    pub async fn find_exact(
        &self,
        coordinator: &DownloadCoordinator,
        id: &AssetId,
    ) -> Result<Option<Asset>> {
        if let Some(resolved) = self.resolve_entry(id).await? {
            return Ok(Some(resolved.entry.asset));
        }
        Ok(coordinator.record(id).map(|record| record.asset.clone()))
    }

    /// Downloaded and downloading assets whose id starts with `prefix`,
    /// one per id, sorted.
    pub async fn find_by_prefix(
        &self,
        coordinator: &DownloadCoordinator,
        prefix: &str,
    ) -> Result<Vec<Asset>> {
        let mut found: BTreeMap<AssetId, Asset> = BTreeMap::new();

        for id in self.persisted_ids_with_prefix(prefix).await? {
            if let Some(resolved) = self.resolve_entry(&id).await? {
                found.insert(id, resolved.entry.asset);
            }
        }

        for id in coordinator.ids_with_prefix(prefix) {
            if let Some(record) = coordinator.record(&id) {
                found.entry(id).or_insert_with(|| record.asset.clone());
            }
        }

        Ok(found.into_values().collect())
    }
}
