//! # Event Bus System
//!
//! Publishes download state changes to the application layer using
//! `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐  subscribe   ┌────────────┐
//! │ Lifecycle manager├──────────>│ EventBus  ├─────────────>│ UI / host  │
//! └──────────────────┘           │ (broadcast│              └────────────┘
//! ┌──────────────────┐   emit    │  channel) │  subscribe   ┌────────────┐
//! │ Reconciler       ├──────────>│           ├─────────────>│ Subscriber │
//! └──────────────────┘           └───────────┘              └────────────┘
//! ```
//!
//! ## Delivery guarantees
//!
//! Events for one asset id are emitted in order; there is no ordering across
//! asset ids. Consumers must treat a repeated `StateChanged` for the same
//! transition as a no-op.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, DownloadState, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(CoreEvent::Download(DownloadEvent::StateChanged {
//!     asset_id: "episode-1".to_string(),
//!     state: DownloadState::Downloading,
//!     progress: Some(0.0),
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.asset_id(), Some("episode-1"));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. Non-fatal; re-query state after lagging.
//! - **`RecvError::Closed`**: every sender is gone. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Progress callbacks can be frequent; subscribers that can't keep up
/// receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Offline download events
    Download(DownloadEvent),
}

impl CoreEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
        }
    }

    /// Get the severity level of the event
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::Restored { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Asset the event refers to, if any.
    pub fn asset_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Download(e) => e.asset_id(),
        }
    }
}

/// Event severity levels for filtering and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Externally visible download status carried by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    NotDownloaded,
    Downloading,
    Downloaded,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadState::NotDownloaded => "not_downloaded",
            DownloadState::Downloading => "downloading",
            DownloadState::Downloaded => "downloaded",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// An asset moved between download states.
    StateChanged {
        asset_id: String,
        state: DownloadState,
        /// Fraction in `[0, 1]`, present while downloading
        progress: Option<f64>,
    },
    /// Progress of an in-flight download, non-decreasing per download.
    Progress { asset_id: String, progress: f64 },
    /// Startup reconciliation finished; cached views should be refreshed.
    Restored { active: usize, completed: usize },
    /// A failure that surfaced outside any caller's call stack.
    Error {
        asset_id: Option<String>,
        message: String,
        /// `true` when retrying the download may succeed
        recoverable: bool,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::StateChanged { .. } => "Download state changed",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Restored { .. } => "Download state restored",
            DownloadEvent::Error { .. } => "Download error",
        }
    }

    pub fn asset_id(&self) -> Option<&str> {
        match self {
            DownloadEvent::StateChanged { asset_id, .. }
            | DownloadEvent::Progress { asset_id, .. } => Some(asset_id),
            DownloadEvent::Error { asset_id, .. } => asset_id.as_deref(),
            DownloadEvent::Restored { .. } => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus holding up to `capacity` undelivered events
    /// per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it, or an error when
    /// nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver with an optional predicate applied before delivery.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let stream = EventStream::new(bus.subscribe()).for_asset("episode-1");
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only deliver events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only deliver events about `asset_id`.
    pub fn for_asset(self, asset_id: impl Into<String>) -> Self {
        let asset_id = asset_id.into();
        self.filter(move |event| event.asset_id() == Some(asset_id.as_str()))
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Receive without waiting; `None` when no matching event is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(asset_id: &str, state: DownloadState) -> CoreEvent {
        CoreEvent::Download(DownloadEvent::StateChanged {
            asset_id: asset_id.to_string(),
            state,
            progress: None,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus
            .emit(state_changed("a", DownloadState::Downloaded))
            .is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Download(DownloadEvent::Restored {
            active: 1,
            completed: 3,
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_for_asset() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_asset("b");

        bus.emit(state_changed("a", DownloadState::Downloading)).ok();
        bus.emit(CoreEvent::Download(DownloadEvent::Restored {
            active: 0,
            completed: 0,
        }))
        .ok();
        let wanted = state_changed("b", DownloadState::Downloaded);
        bus.emit(wanted.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), wanted);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| event.severity() == EventSeverity::Error);

        bus.emit(state_changed("a", DownloadState::Downloading)).ok();
        let error = CoreEvent::Download(DownloadEvent::Error {
            asset_id: Some("a".to_string()),
            message: "transfer failed".to_string(),
            recoverable: true,
        });
        bus.emit(error.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), error);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Download(DownloadEvent::Progress {
                asset_id: "a".to_string(),
                progress: i as f64 / 5.0,
            }))
            .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity_and_description() {
        let error = CoreEvent::Download(DownloadEvent::Error {
            asset_id: None,
            message: "unsupported".to_string(),
            recoverable: false,
        });
        assert_eq!(error.severity(), EventSeverity::Error);
        assert_eq!(error.description(), "Download error");

        let restored = CoreEvent::Download(DownloadEvent::Restored {
            active: 0,
            completed: 0,
        });
        assert_eq!(restored.severity(), EventSeverity::Info);

        let progress = CoreEvent::Download(DownloadEvent::Progress {
            asset_id: "a".to_string(),
            progress: 0.5,
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Download(DownloadEvent::StateChanged {
            asset_id: "episode-1".to_string(),
            state: DownloadState::Downloading,
            progress: Some(0.25),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Download\""));
        assert!(json.contains("\"state\":\"downloading\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        let event = state_changed("a", DownloadState::NotDownloaded);
        bus.emit(event.clone()).ok();
        assert_eq!(stream.try_recv().unwrap().unwrap(), event);
    }
}
