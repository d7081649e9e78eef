//! # Offline Downloads
//!
//! Keeps remotely streamed adaptive media (HLS, DASH) available offline.
//!
//! ## Overview
//!
//! - [`OfflineManager`] is the entry point. It owns the engine callback loop
//!   and serializes every mutation behind one lock.
//! - [`DownloadCoordinator`] tracks in-flight native tasks.
//! - [`LocationStore`] persists where finished downloads live.
//! - [`StateReconciler`] re-adopts tasks that survived a restart.
//! - [`AssetLifecycle`] derives visible state, finalizes completions and
//!   deletes downloads.
//!
//! An asset is never both persisted and in flight: the persisted entry means
//! "downloaded", the in-flight record means "downloading".
//!
//! ## Usage
//!
//! ```ignore
//! use core_offline::{Asset, OfflineManager};
//! use bridge_traits::SourceDescriptor;
//!
//! let manager = OfflineManager::from_config(&config, event_bus.clone());
//! manager.initialize().await?;
//!
//! let asset = Asset::new("episode-42", SourceDescriptor::hls("https://cdn.example.com/42/master.m3u8"));
//! manager.request_download(asset).await?;
//! ```

pub mod asset;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod progress;
pub mod reconciler;
pub mod store;

pub use asset::{Asset, AssetId, DerivedState};
pub use coordinator::{CancelRequest, DownloadCoordinator, DownloadRecord, ProgressUpdate};
pub use error::{OfflineError, Result};
pub use lifecycle::AssetLifecycle;
pub use manager::{OfflineManager, PrefixDeletion};
pub use reconciler::{ReconcileReport, StateReconciler};
pub use store::{LocationStore, LocationToken, PersistedEntry};
