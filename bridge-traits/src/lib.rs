//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the offline download core and the
//! host. Each trait represents a capability that the core requires but that is
//! provided differently per platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Downloads
//! - [`DownloadEngine`](download::DownloadEngine) - Segmented, resumable background
//!   transfer of adaptive streams (AVAssetDownloadURLSession, ExoPlayer DownloadManager, ...)
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable application-scoped key/value blobs
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Existence checks and deletion of downloaded media
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Engine callbacks
//!
//! The engine reports progress and completion on its own delivery context. Hosts
//! never call back into the core directly; they push [`EngineEvent`]s through the
//! [`EngineEventSender`] handed to them in [`DownloadEngine::attach`]. The core
//! drains that channel from a single task.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError` and
//! include context (paths, task handles) in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across async
//! tasks behind an `Arc`.

pub mod download;
pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use download::{
    DownloadEngine, EngineEvent, EngineEventReceiver, EngineEventSender, EngineFailure,
    EngineFailureKind, EngineOutcome, KnownTask, MediaType, SourceDescriptor, TaskHandle,
    TimeRange,
};
pub use storage::{FileMetadata, FileSystemAccess, KeyValueStore};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
