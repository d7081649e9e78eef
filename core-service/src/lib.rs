//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (download engine,
//! key-value store, file system) into the offline download core. Desktop apps
//! typically enable the `desktop-shims` feature, which fills in a SQLite
//! key-value store and a `tokio::fs` file system from `bridge-desktop`; mobile
//! hosts inject their own.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/var/lib/player")
//!     .download_engine(engine)
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//! let mut events = core.subscribe();
//! core.downloads().request_download(asset).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_offline::{OfflineError, OfflineManager};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    events: EventBus,
    downloads: Arc<OfflineManager>,
}

impl CoreService {
    /// Validate `config`, create the event bus and bring up the offline
    /// download manager, including restart reconciliation.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.offline.event_buffer_size);
        let downloads = OfflineManager::from_config(&config, events.clone());

        downloads.initialize().await.map_err(|e| match e {
            OfflineError::EnvironmentUnsupported(_) => CoreError::Offline(e),
            other => CoreError::InitializationFailed(other.to_string()),
        })?;

        info!("Core service ready");
        Ok(Self {
            config: Arc::new(config),
            events,
            downloads: Arc::new(downloads),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// The offline download manager.
    pub fn downloads(&self) -> &OfflineManager {
        &self.downloads
    }

    /// Stop processing engine callbacks.
    pub fn shutdown(&self) {
        self.downloads.shutdown();
    }
}
