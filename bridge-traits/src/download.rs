//! Download Engine Abstractions
//!
//! Describes the platform download engine that performs segmented, resumable
//! background transfer of adaptive media (HLS, DASH). The engine owns the
//! transfers and the on-disk layout; the core only submits, aborts and
//! re-associates tasks by their tag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

/// Opaque identifier of a native download task.
///
/// The core never owns the engine's task object; it only keeps this handle to
/// route callbacks back to the asset that started the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Streaming format of a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// HTTP Live Streaming playlist (`.m3u8`)
    #[default]
    Hls,
    /// MPEG-DASH manifest (`.mpd`)
    Dash,
    /// Microsoft Smooth Streaming manifest
    SmoothStreaming,
    /// Single progressive file
    Progressive,
}

/// Where and how to fetch a piece of remote media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub media_type: MediaType,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            media_type,
        }
    }

    pub fn hls(url: impl Into<String>) -> Self {
        Self::new(url, MediaType::Hls)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A span of media time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl TimeRange {
    pub fn new(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start_secs,
            duration_secs,
        }
    }
}

/// Why the engine gave up on a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineFailureKind {
    /// The user (or the core) aborted the task and the engine surfaced it as an error.
    UserAborted,
    /// Adaptive-stream downloads cannot run in this environment (simulators, emulators).
    EnvironmentUnsupported,
    /// Network or storage failure during the transfer.
    Transfer,
    /// Error from a domain the host could not classify.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub kind: EngineFailureKind,
    pub message: String,
}

impl EngineFailure {
    pub fn new(kind: EngineFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal result of a native task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOutcome {
    /// The media was fully stored at `location`.
    Finished { location: PathBuf },
    /// The task was cancelled before completion.
    Cancelled,
    /// The task failed.
    Failed(EngineFailure),
}

/// Callback payload delivered by the engine from its own execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress {
        handle: TaskHandle,
        loaded_ranges: Vec<TimeRange>,
        expected_range: TimeRange,
    },
    Completed {
        handle: TaskHandle,
        outcome: EngineOutcome,
    },
}

impl EngineEvent {
    pub fn handle(&self) -> TaskHandle {
        match self {
            EngineEvent::Progress { handle, .. } | EngineEvent::Completed { handle, .. } => *handle,
        }
    }
}

/// Receiving half of the engine callback channel, drained by the core.
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Sending half of the engine callback channel.
///
/// Cheap to clone and safe to use from any thread; sends never block.
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    inner: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSender {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (Self, EngineEventReceiver) {
        let (inner, receiver) = mpsc::unbounded_channel();
        (Self { inner }, receiver)
    }

    pub fn send(&self, event: EngineEvent) -> Result<()> {
        self.inner.send(event).map_err(|e| {
            BridgeError::OperationFailed(format!(
                "Engine event channel closed, dropped event for {}",
                e.0.handle()
            ))
        })
    }

    pub fn progress(
        &self,
        handle: TaskHandle,
        loaded_ranges: Vec<TimeRange>,
        expected_range: TimeRange,
    ) -> Result<()> {
        self.send(EngineEvent::Progress {
            handle,
            loaded_ranges,
            expected_range,
        })
    }

    pub fn completed(&self, handle: TaskHandle, outcome: EngineOutcome) -> Result<()> {
        self.send(EngineEvent::Completed { handle, outcome })
    }

    /// Returns `true` once the core has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A task the engine still tracks, typically one that survived a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownTask {
    pub handle: TaskHandle,
    /// Tag given at submission time; `None` when the platform lost it.
    pub tag: Option<String>,
    pub source: SourceDescriptor,
}

/// Platform download engine.
///
/// Implementations:
/// - iOS: `AVAssetDownloadURLSession` with a background configuration
/// - Android: ExoPlayer `DownloadManager` + `DownloadService`
/// - Tests: in-memory fakes driving callbacks by hand
///
/// # Example
///
/// ```ignore
/// use bridge_traits::download::{DownloadEngine, SourceDescriptor};
///
/// async fn fetch(engine: &dyn DownloadEngine) -> Result<()> {
///     let source = SourceDescriptor::hls("https://cdn.example.com/show/master.m3u8");
///     let handle = engine.submit(&source, "episode-42").await?;
///     println!("started {}", handle);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Verify that adaptive-stream downloads can run here at all.
    ///
    /// Returns `BridgeError::NotAvailable` on unsupported environments.
    async fn check_environment(&self) -> Result<()>;

    /// Hand the engine the channel it must use for progress and completion callbacks.
    ///
    /// Called before `enumerate_known_tasks`. If initialization is retried the
    /// newer sender replaces the older one.
    fn attach(&self, events: EngineEventSender);

    /// Start a new native task for `source`, tagged with `tag`.
    ///
    /// Returns as soon as the task is queued; the transfer runs asynchronously.
    async fn submit(&self, source: &SourceDescriptor, tag: &str) -> Result<TaskHandle>;

    /// Ask the engine to abort a task. The final outcome still arrives as a callback.
    async fn abort(&self, handle: TaskHandle) -> Result<()>;

    /// List every task the engine currently tracks.
    async fn enumerate_known_tasks(&self) -> Result<Vec<KnownTask>>;
}
