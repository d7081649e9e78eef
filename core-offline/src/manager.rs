//! # Offline Manager
//!
//! Entry point for host applications. Owns the coordinator, the persisted
//! locations and the loop that applies engine callbacks.
//!
//! ## Serialization
//!
//! The coordinator lives behind one async mutex. Every request, every engine
//! callback and every query that may self-heal a stale entry runs while
//! holding it, so a cancel racing a completion can never both touch the same
//! record, and events for one asset are published in order.
//!
//! Engine callbacks arrive on an unbounded channel from whatever thread the
//! engine uses and are applied by a single pump task. The engine never calls
//! back synchronously from `submit`/`abort`, so holding the lock across those
//! calls cannot deadlock.

use bridge_traits::{
    BridgeError, Clock, DownloadEngine, EngineEvent, EngineEventReceiver, EngineEventSender,
    FileSystemAccess, KeyValueStore,
};
use core_runtime::config::{CoreConfig, OfflineSettings};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, EventStream, Receiver};
use core_runtime::logging::redact_headers;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::asset::{Asset, AssetId, DerivedState};
use crate::coordinator::{CancelRequest, DownloadCoordinator};
use crate::error::{OfflineError, Result};
use crate::lifecycle::AssetLifecycle;
use crate::progress;
use crate::reconciler::{ReconcileReport, StateReconciler};
use crate::store::LocationStore;

/// Summary of [`OfflineManager::request_delete_by_prefix`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixDeletion {
    /// Downloaded assets whose storage and entry were removed
    pub deleted: Vec<AssetId>,
    /// In-flight assets an abort was requested for
    pub cancelled: Vec<AssetId>,
    /// Assets that could not be deleted or cancelled, with the reason
    pub failed: Vec<(AssetId, String)>,
}

impl PrefixDeletion {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.cancelled.is_empty() && self.failed.is_empty()
    }
}

struct Inner {
    engine: Arc<dyn DownloadEngine>,
    coordinator: Mutex<DownloadCoordinator>,
    lifecycle: AssetLifecycle,
    reconciler: StateReconciler,
    cancel_timeout: Duration,
    restored: OnceCell<ReconcileReport>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Offline download manager.
///
/// Construct it, call [`initialize`](Self::initialize) once, then issue
/// requests. Outcomes that arrive later (finished, failed, cancelled
/// downloads) are published on the [`EventBus`].
pub struct OfflineManager {
    inner: Arc<Inner>,
}

impl OfflineManager {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        key_value_store: Arc<dyn KeyValueStore>,
        file_system: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        settings: &OfflineSettings,
    ) -> Self {
        let store = LocationStore::new(
            key_value_store,
            file_system.clone(),
            clock,
            settings.location_key_prefix.clone(),
        );
        let lifecycle = AssetLifecycle::new(store, file_system, events);

        Self {
            inner: Arc::new(Inner {
                coordinator: Mutex::new(DownloadCoordinator::new(engine.clone())),
                engine,
                lifecycle,
                reconciler: StateReconciler::new(),
                cancel_timeout: settings.cancel_timeout,
                restored: OnceCell::new(),
                pump: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Build a manager from the capabilities in a validated [`CoreConfig`].
    pub fn from_config(config: &CoreConfig, events: EventBus) -> Self {
        Self::new(
            config.download_engine.clone(),
            config.key_value_store.clone(),
            config.file_system.clone(),
            config.clock.clone(),
            events,
            &config.offline,
        )
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Verify the environment, re-adopt surviving tasks and start applying
    /// engine callbacks.
    ///
    /// Publishes [`DownloadEvent::Restored`] once. Calling it again after a
    /// success is a no-op; after a failure it retries.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.inner
            .restored
            .get_or_try_init(|| self.start())
            .await?;
        Ok(())
    }

    async fn start(&self) -> Result<ReconcileReport> {
        let inner = &self.inner;

        if let Err(e) = inner.engine.check_environment().await {
            return Err(match e {
                BridgeError::NotAvailable(message) => {
                    inner.lifecycle.report_environment_fault(None, &message);
                    OfflineError::EnvironmentUnsupported(message)
                }
                other => OfflineError::Bridge(other),
            });
        }

        // Attach before enumerating so nothing the engine reports in between
        // is lost; events queue on the channel until the pump runs.
        let (sender, receiver) = EngineEventSender::channel();
        inner.engine.attach(sender);

        let report = {
            let mut coordinator = inner.coordinator.lock().await;
            inner
                .reconciler
                .reconcile(inner.engine.as_ref(), &mut coordinator, &inner.lifecycle)
                .await?
                .unwrap_or_default()
        };

        let active = inner.coordinator.lock().await.len();
        info!(active, completed = report.completed, "Offline downloads restored");
        inner.lifecycle.emit(DownloadEvent::Restored {
            active,
            completed: report.completed,
        });

        let handle = tokio::spawn(pump(Arc::downgrade(inner), receiver));
        if let Some(previous) = inner.pump.lock().replace(handle) {
            previous.abort();
        }

        Ok(report)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.restored.initialized()
    }

    /// What startup reconciliation found, once initialized.
    pub fn restore_report(&self) -> Option<&ReconcileReport> {
        self.inner.restored.get()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.lifecycle.events()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events().subscribe()
    }

    /// Events concerning a single asset.
    pub fn subscribe_asset(&self, id: &AssetId) -> EventStream {
        EventStream::new(self.subscribe()).for_asset(id.as_str())
    }

    /// Stop applying engine callbacks. Running native tasks are left alone.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
            info!("Offline manager shut down");
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Start downloading `asset`.
    ///
    /// Returns once the engine accepted the task. Rejects assets that are
    /// already downloading or downloaded.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub async fn request_download(&self, asset: Asset) -> Result<()> {
        asset.validate()?;
        if !self.is_initialized() {
            return Err(OfflineError::NotInitialized);
        }

        let inner = &self.inner;
        let mut coordinator = inner.coordinator.lock().await;

        if coordinator.is_in_flight(&asset.id) {
            return Err(OfflineError::AlreadyInFlight(asset.id));
        }
        if inner.lifecycle.resolve_entry(&asset.id).await?.is_some() {
            return Err(OfflineError::AlreadyDownloaded(asset.id));
        }

        debug!(
            url = %asset.source.url,
            headers = %redact_headers(&asset.source.headers),
            "Submitting download"
        );

        let id = asset.id.clone();
        coordinator.start(asset).await?;
        inner.lifecycle.emit_state(&id, DerivedState::Downloading { progress: 0.0 });
        Ok(())
    }

    /// Ask the engine to abort the download of `id`.
    ///
    /// The asset leaves the downloading state only when the engine confirms.
    #[instrument(skip(self))]
    pub async fn request_cancel(&self, id: &AssetId) -> Result<()> {
        let mut coordinator = self.inner.coordinator.lock().await;
        self.inner.cancel_locked(&mut coordinator, id).await
    }

    /// Remove a downloaded asset from disk and forget it.
    #[instrument(skip(self))]
    pub async fn request_delete(&self, id: &AssetId) -> Result<()> {
        if !self.is_initialized() {
            return Err(OfflineError::NotFound(id.clone()));
        }

        let coordinator = self.inner.coordinator.lock().await;
        self.inner.lifecycle.delete(&coordinator, id).await
    }

    /// Delete every downloaded asset and cancel every running download whose
    /// id starts with `prefix`. An empty prefix matches everything.
    #[instrument(skip(self))]
    pub async fn request_delete_by_prefix(&self, prefix: &str) -> Result<PrefixDeletion> {
        let mut summary = PrefixDeletion::default();
        if !self.is_initialized() {
            return Ok(summary);
        }

        let inner = &self.inner;
        let mut coordinator = inner.coordinator.lock().await;

        // Listing is the only step that aborts the whole request, so it runs
        // before anything is cancelled or deleted.
        let persisted = inner.lifecycle.persisted_ids_with_prefix(prefix).await?;

        for id in coordinator.ids_with_prefix(prefix) {
            match inner.cancel_locked(&mut coordinator, &id).await {
                Ok(()) => summary.cancelled.push(id),
                Err(e) => summary.failed.push((id, e.to_string())),
            }
        }

        for id in persisted {
            match inner.lifecycle.delete(&coordinator, &id).await {
                Ok(()) => summary.deleted.push(id),
                // Healed away as stale while resolving.
                Err(OfflineError::NotFound(_)) => {}
                Err(e) => summary.failed.push((id, e.to_string())),
            }
        }

        info!(
            deleted = summary.deleted.len(),
            cancelled = summary.cancelled.len(),
            failed = summary.failed.len(),
            "Prefix deletion finished"
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn query_state(&self, id: &AssetId) -> Result<DerivedState> {
        let coordinator = self.inner.coordinator.lock().await;
        self.inner.lifecycle.state_of(&coordinator, id).await
    }

    /// Downloaded assets, sorted by id. Stale entries are cleared on the way.
    pub async fn query_completed(&self) -> Result<Vec<Asset>> {
        let _coordinator = self.inner.coordinator.lock().await;
        self.inner.lifecycle.completed().await
    }

    /// Running downloads with their progress, sorted by id.
    pub async fn query_active(&self) -> Vec<(Asset, f64)> {
        self.inner.coordinator.lock().await.active()
    }

    pub async fn find_exact(&self, id: &AssetId) -> Result<Option<Asset>> {
        let coordinator = self.inner.coordinator.lock().await;
        self.inner.lifecycle.find_exact(&coordinator, id).await
    }

    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Asset>> {
        let coordinator = self.inner.coordinator.lock().await;
        self.inner.lifecycle.find_by_prefix(&coordinator, prefix).await
    }
}

impl Drop for OfflineManager {
    fn drop(&mut self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Inner {
    async fn cancel_locked(
        self: &Arc<Self>,
        coordinator: &mut DownloadCoordinator,
        id: &AssetId,
    ) -> Result<()> {
        match coordinator.cancel(id).await? {
            CancelRequest::Issued { generation } => {
                self.spawn_cancel_watchdog(id.clone(), generation);
            }
            CancelRequest::AlreadyPending => {}
            CancelRequest::Orphaned => {
                self.lifecycle.emit_state(id, DerivedState::NotDownloaded);
            }
        }
        Ok(())
    }

    /// Surface an abort the engine never acknowledged. The record stays,
    /// since the engine may still hold a live task for it, but the abort is
    /// no longer considered pending so the caller can issue it again.
    fn spawn_cancel_watchdog(self: &Arc<Self>, id: AssetId, generation: u64) {
        let inner = Arc::downgrade(self);
        let timeout = self.cancel_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };

            let mut coordinator = inner.coordinator.lock().await;
            if coordinator.expire_cancel(&id, generation) {
                warn!(asset_id = %id, ?timeout, "Cancellation not acknowledged by engine");
                inner.lifecycle.emit(DownloadEvent::Error {
                    asset_id: Some(id.to_string()),
                    message: format!("cancellation not acknowledged within {:?}", timeout),
                    recoverable: true,
                });
            }
        });
    }

    async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Progress {
                handle,
                loaded_ranges,
                expected_range,
            } => {
                let fraction = progress::fraction_complete(&loaded_ranges, &expected_range);
                let mut coordinator = self.coordinator.lock().await;
                match coordinator.update_progress(handle, fraction) {
                    Some(update) if update.advanced => {
                        self.lifecycle.emit(DownloadEvent::Progress {
                            asset_id: update.asset_id.to_string(),
                            progress: update.progress,
                        });
                    }
                    Some(_) => {}
                    None => debug!(handle = %handle, "Progress for untracked task"),
                }
            }
            EngineEvent::Completed { handle, outcome } => {
                let mut coordinator = self.coordinator.lock().await;
                let Some(record) = coordinator.complete(handle) else {
                    warn!(handle = %handle, "Completion for untracked task, ignoring");
                    return;
                };
                self.lifecycle.finalize(record, outcome).await;
            }
        }
    }
}

async fn pump(inner: Weak<Inner>, mut receiver: EngineEventReceiver) {
    while let Some(event) = receiver.recv().await {
        let Some(state) = inner.upgrade() else {
            break;
        };
        state.handle_engine_event(event).await;
    }
    debug!("Engine event loop stopped");
}
