//! # Core Configuration
//!
//! Collects the host capabilities and tuning knobs the offline download core
//! needs, and validates them before anything starts.
//!
//! ## Required capabilities
//!
//! - [`DownloadEngine`]: always injected by the host; there is no default.
//! - [`KeyValueStore`] and [`FileSystemAccess`]: injected on mobile. With the
//!   `desktop-shims` feature they default to a SQLite file under `data_dir`
//!   and `tokio::fs`.
//!
//! ## Example
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, OfflineSettings};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/var/app/offline")
//!     .download_engine(engine)
//!     .key_value_store(store)
//!     .file_system(fs)
//!     .offline_settings(OfflineSettings::default().with_cancel_timeout(Duration::from_secs(10)))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, DownloadEngine, FileSystemAccess, KeyValueStore, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Key prefix under which download locations are persisted.
pub const DEFAULT_LOCATION_KEY_PREFIX: &str = "offline.location.";

/// How long a cancellation may stay unacknowledged before it is reported.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_CANCEL_TIMEOUT: Duration = Duration::from_secs(3600);

/// File name of the default desktop key-value database inside `data_dir`.
pub const DEFAULT_DATABASE_FILE: &str = "offline-downloads.db";

/// Tuning for the offline download manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineSettings {
    /// Bound on waiting for the engine to acknowledge an abort
    pub cancel_timeout: Duration,
    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
    /// Prefix prepended to asset ids in the key-value store
    pub location_key_prefix: String,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            event_buffer_size: crate::events::DEFAULT_EVENT_BUFFER_SIZE,
            location_key_prefix: DEFAULT_LOCATION_KEY_PREFIX.to_string(),
        }
    }
}

impl OfflineSettings {
    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_location_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.location_key_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.location_key_prefix.is_empty() {
            return Err(Error::Config(
                "Location key prefix cannot be empty".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.cancel_timeout.is_zero() {
            return Err(Error::Config(
                "Cancel timeout must be greater than 0".to_string(),
            ));
        }

        if self.cancel_timeout > MAX_CANCEL_TIMEOUT {
            return Err(Error::Config(
                "Cancel timeout exceeds maximum of 1 hour".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validated configuration handed to the service bootstrap.
#[derive(Clone)]
pub struct CoreConfig {
    /// Application data directory; default desktop database lives here
    pub data_dir: PathBuf,

    pub download_engine: Arc<dyn DownloadEngine>,

    pub key_value_store: Arc<dyn KeyValueStore>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub clock: Arc<dyn Clock>,

    pub offline: OfflineSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("download_engine", &"DownloadEngine { ... }")
            .field("key_value_store", &"KeyValueStore { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("offline", &self.offline)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        self.offline.validate()
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_key_value_store(data_dir: &Path) -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::LazySqliteKeyValueStore;

    let store: Arc<dyn KeyValueStore> =
        Arc::new(LazySqliteKeyValueStore::new(data_dir.join(DEFAULT_DATABASE_FILE)));
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_key_value_store(_data_dir: &Path) -> Result<Arc<dyn KeyValueStore>> {
    Err(Error::missing(
        "KeyValueStore",
        "KeyValueStore implementation is required to persist download locations. \
         Desktop: enable the 'desktop-shims' feature to use the default SQLite store. \
         Mobile: inject UserDefaults/SharedPreferences-backed storage.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> =
        Arc::new(TokioFileSystem::with_data_directory(data_dir.to_path_buf()));
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::missing(
        "FileSystemAccess",
        "FileSystemAccess implementation is required to verify and delete downloads. \
         Desktop: enable the 'desktop-shims' feature to use the default tokio::fs implementation. \
         Mobile: inject access to the application container.",
    ))
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    download_engine: Option<Arc<dyn DownloadEngine>>,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
    offline: Option<OfflineSettings>,
}

impl CoreConfigBuilder {
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn download_engine(mut self, engine: Arc<dyn DownloadEngine>) -> Self {
        self.download_engine = Some(engine);
        self
    }

    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn offline_settings(mut self, settings: OfflineSettings) -> Self {
        self.offline = Some(settings);
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let download_engine = self.download_engine.ok_or_else(|| {
            Error::missing(
                "DownloadEngine",
                "DownloadEngine implementation is required. \
                 iOS: wrap AVAssetDownloadURLSession. Android: wrap the ExoPlayer DownloadManager.",
            )
        })?;

        let key_value_store = match self.key_value_store {
            Some(store) => store,
            None => provide_default_key_value_store(&data_dir)?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&data_dir)?,
        };

        let config = CoreConfig {
            data_dir,
            download_engine,
            key_value_store,
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            offline: self.offline.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
