//! Hand-written fakes for the host capabilities, shared by the integration
//! tests. The fake engine records what it was asked to do and lets a test
//! deliver callbacks whenever it wants, the way a real engine would from its
//! own thread.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, DownloadEngine, EngineEventSender, EngineFailure, EngineFailureKind,
    EngineOutcome, FileMetadata, FileSystemAccess, FixedClock, KeyValueStore, KnownTask,
    SourceDescriptor, TaskHandle, TimeRange,
};
use bytes::Bytes;
use core_offline::{Asset, AssetId, LocationStore, OfflineManager};
use core_runtime::config::{OfflineSettings, DEFAULT_LOCATION_KEY_PREFIX};
use core_runtime::events::{CoreEvent, DownloadEvent, DownloadState, EventBus, Receiver};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DATA_DIR: &str = "/app/data";

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct EngineState {
    sender: Option<EngineEventSender>,
    attach_count: usize,
    next_handle: u64,
    submitted: Vec<(TaskHandle, String)>,
    aborted: Vec<TaskHandle>,
    known: Vec<KnownTask>,
    unsupported: Option<String>,
    forget_on_abort: bool,
}

/// Download engine that never transfers anything on its own.
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState {
                next_handle: 100,
                ..EngineState::default()
            }),
        })
    }

    /// Engine that still tracks `tasks` from a previous process.
    pub fn with_known_tasks(tasks: Vec<KnownTask>) -> Arc<Self> {
        let engine = Self::new();
        engine.state.lock().known = tasks;
        engine
    }

    pub fn unsupported(message: &str) -> Arc<Self> {
        let engine = Self::new();
        engine.state.lock().unsupported = Some(message.to_string());
        engine
    }

    /// Make `abort` answer as if the engine had already lost every task.
    pub fn forget_tasks_on_abort(&self) {
        self.state.lock().forget_on_abort = true;
    }

    pub fn attach_count(&self) -> usize {
        self.state.lock().attach_count
    }

    /// Tags of every submitted task, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.state
            .lock()
            .submitted
            .iter()
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn aborted(&self) -> Vec<TaskHandle> {
        self.state.lock().aborted.clone()
    }

    /// Handle of the most recent task submitted for `tag`.
    pub fn handle_for(&self, tag: &str) -> TaskHandle {
        self.state
            .lock()
            .submitted
            .iter()
            .rev()
            .find(|(_, submitted)| submitted == tag)
            .map(|(handle, _)| *handle)
            .unwrap_or_else(|| panic!("no task submitted for {}", tag))
    }

    fn sender(&self) -> EngineEventSender {
        self.state
            .lock()
            .sender
            .clone()
            .expect("engine was never attached")
    }

    pub fn report_ranges(&self, handle: TaskHandle, loaded: Vec<TimeRange>, expected_secs: f64) {
        self.sender()
            .progress(handle, loaded, TimeRange::new(0.0, expected_secs))
            .unwrap();
    }

    /// Report `loaded_secs` of `expected_secs` as a single range.
    pub fn report_progress(&self, handle: TaskHandle, loaded_secs: f64, expected_secs: f64) {
        self.report_ranges(handle, vec![TimeRange::new(0.0, loaded_secs)], expected_secs);
    }

    pub fn finish(&self, handle: TaskHandle, location: impl Into<PathBuf>) {
        self.sender()
            .completed(
                handle,
                EngineOutcome::Finished {
                    location: location.into(),
                },
            )
            .unwrap();
    }

    pub fn cancelled(&self, handle: TaskHandle) {
        self.sender()
            .completed(handle, EngineOutcome::Cancelled)
            .unwrap();
    }

    pub fn fail(&self, handle: TaskHandle, kind: EngineFailureKind, message: &str) {
        self.sender()
            .completed(
                handle,
                EngineOutcome::Failed(EngineFailure::new(kind, message)),
            )
            .unwrap();
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn check_environment(&self) -> BridgeResult<()> {
        match &self.state.lock().unsupported {
            Some(message) => Err(BridgeError::NotAvailable(message.clone())),
            None => Ok(()),
        }
    }

    fn attach(&self, events: EngineEventSender) {
        let mut state = self.state.lock();
        state.sender = Some(events);
        state.attach_count += 1;
    }

    async fn submit(&self, _source: &SourceDescriptor, tag: &str) -> BridgeResult<TaskHandle> {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = TaskHandle(state.next_handle);
        state.submitted.push((handle, tag.to_string()));
        Ok(handle)
    }

    async fn abort(&self, handle: TaskHandle) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.forget_on_abort {
            return Err(BridgeError::UnknownTask(handle.0));
        }
        state.aborted.push(handle);
        Ok(())
    }

    async fn enumerate_known_tasks(&self) -> BridgeResult<Vec<KnownTask>> {
        Ok(self.state.lock().known.clone())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, Bytes>>,
    listing_fails: Mutex<bool>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn fail_listing(&self) {
        *self.listing_fails.lock() = true;
    }

    pub fn insert_raw(&self, key: &str, value: &'static [u8]) {
        self.values
            .lock()
            .insert(key.to_string(), Bytes::from_static(value));
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<Bytes>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> BridgeResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        if *self.listing_fails.lock() {
            return Err(BridgeError::DatabaseError("store locked".to_string()));
        }
        Ok(self.values.lock().keys().cloned().collect())
    }
}

/// File system holding only paths; `true` marks a directory.
pub struct MemoryFileSystem {
    data_dir: PathBuf,
    entries: Mutex<BTreeMap<PathBuf, bool>>,
    deletes_fail: Mutex<bool>,
}

impl MemoryFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data_dir: PathBuf::from(DATA_DIR),
            entries: Mutex::new(BTreeMap::new()),
            deletes_fail: Mutex::new(false),
        })
    }

    /// Create a package directory under the data directory, as an engine would.
    pub fn create_package(&self, name: impl AsRef<Path>) -> PathBuf {
        let path = self.data_dir.join("downloads").join(name);
        self.entries.lock().insert(path.clone(), true);
        self.entries.lock().insert(path.join("index.m3u8"), false);
        path
    }

    /// Simulate the OS purging storage behind our back.
    pub fn purge(&self, path: &Path) {
        self.entries
            .lock()
            .retain(|entry, _| !entry.starts_with(path));
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn fail_deletes(&self) {
        *self.deletes_fail.lock() = true;
    }

    fn check_deletes(&self) -> BridgeResult<()> {
        if *self.deletes_fail.lock() {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only volume",
            )));
        }
        Ok(())
    }
}

fn not_found(path: &Path) -> BridgeError {
    BridgeError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(self.contains(path))
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let is_directory = *self
            .entries
            .lock()
            .get(path)
            .ok_or_else(|| not_found(path))?;
        Ok(FileMetadata {
            size: 0,
            created_at: None,
            modified_at: None,
            is_directory,
        })
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.check_deletes()?;
        self.entries
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.check_deletes()?;
        if !self.contains(path) {
            return Err(not_found(path));
        }
        self.purge(path);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub kv: Arc<MemoryKeyValueStore>,
    pub fs: Arc<MemoryFileSystem>,
    pub events: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(FakeEngine::new())
    }

    pub fn with_engine(engine: Arc<FakeEngine>) -> Self {
        Self {
            engine,
            kv: MemoryKeyValueStore::new(),
            fs: MemoryFileSystem::new(),
            events: EventBus::new(64),
        }
    }

    pub fn manager(&self) -> OfflineManager {
        self.manager_with(OfflineSettings::default())
    }

    pub fn manager_with(&self, settings: OfflineSettings) -> OfflineManager {
        OfflineManager::new(
            self.engine.clone(),
            self.kv.clone(),
            self.fs.clone(),
            Arc::new(FixedClock::at_unix(1_700_000_000)),
            self.events.clone(),
            &settings,
        )
    }

    /// Start a manager that reconciled against the current engine state.
    pub async fn ready_manager(&self) -> OfflineManager {
        let manager = self.manager();
        manager.initialize().await.unwrap();
        manager
    }

    /// Record `id` as downloaded by an earlier process, with storage on disk.
    pub async fn seed_downloaded(&self, id: &str) -> PathBuf {
        let path = self.fs.create_package(&format!("{}.movpkg", id));
        let store = LocationStore::new(
            self.kv.clone(),
            self.fs.clone(),
            Arc::new(FixedClock::at_unix(1_600_000_000)),
            DEFAULT_LOCATION_KEY_PREFIX,
        );
        let token = store.token_for(&path).await.unwrap();
        store.put(&asset(id), token).await.unwrap();
        path
    }

    pub fn has_entry(&self, id: &str) -> bool {
        self.kv
            .keys()
            .contains(&format!("{}{}", DEFAULT_LOCATION_KEY_PREFIX, id))
    }
}

pub fn asset(id: &str) -> Asset {
    Asset::new(
        id,
        SourceDescriptor::hls(format!("https://cdn.example.com/{}/master.m3u8", id)),
    )
}

pub fn id(value: &str) -> AssetId {
    AssetId::from(value)
}

pub fn known_task(handle: u64, tag: &str) -> KnownTask {
    KnownTask {
        handle: TaskHandle(handle),
        tag: Some(tag.to_string()),
        source: asset(tag).source,
    }
}

// ============================================================================
// Events
// ============================================================================

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Next download event, failing the test if none arrives in time.
pub async fn next_event(events: &mut Receiver<CoreEvent>) -> DownloadEvent {
    let event = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed");
    match event {
        CoreEvent::Download(event) => event,
    }
}

/// Skip events until one matches `predicate`.
pub async fn wait_for<F>(events: &mut Receiver<CoreEvent>, predicate: F) -> DownloadEvent
where
    F: Fn(&DownloadEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

pub async fn wait_for_state(
    events: &mut Receiver<CoreEvent>,
    asset_id: &str,
    state: DownloadState,
) -> DownloadEvent {
    wait_for(events, |event| {
        matches!(
            event,
            DownloadEvent::StateChanged { asset_id: id, state: s, .. }
                if id == asset_id && *s == state
        )
    })
    .await
}

/// Assert nothing is published within `window`.
pub async fn assert_quiet(events: &mut Receiver<CoreEvent>, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event {:?}", event);
    }
}
