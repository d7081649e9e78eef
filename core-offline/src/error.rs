//! # Offline Error Types

use bridge_traits::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

use crate::asset::AssetId;

/// Errors returned by offline download operations.
///
/// Failures that happen after a request was accepted (transfer errors,
/// unacknowledged cancellations) are reported on the event bus instead.
#[derive(Error, Debug)]
pub enum OfflineError {
    // ========================================================================
    // Request rejections
    // ========================================================================
    /// A download for this asset is already running.
    #[error("Download already in flight: {0}")]
    AlreadyInFlight(AssetId),

    /// The asset is already stored offline.
    #[error("Asset already downloaded: {0}")]
    AlreadyDownloaded(AssetId),

    /// No download is running for this asset.
    #[error("No download in flight: {0}")]
    NotInFlight(AssetId),

    /// The asset is not stored offline.
    #[error("Asset not downloaded: {0}")]
    NotFound(AssetId),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Offline manager not initialized")]
    NotInitialized,

    // ========================================================================
    // Storage
    // ========================================================================
    /// A persisted location points at storage that no longer exists.
    #[error("Stored location no longer exists: {}", path.display())]
    StaleLocation { path: PathBuf },

    /// The location cannot be recorded as text, so it could never resolve.
    #[error("Location is not valid UTF-8: {}", path.display())]
    UnrepresentableLocation { path: PathBuf },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========================================================================
    // Engine
    // ========================================================================
    #[error("Download engine error for {asset_id}: {message}")]
    EngineError { asset_id: AssetId, message: String },

    /// Adaptive-stream downloads cannot run in this environment at all.
    #[error("Offline downloads unsupported in this environment: {0}")]
    EnvironmentUnsupported(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OfflineError {
    /// Returns `true` when retrying (possibly after a state change) can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            OfflineError::EnvironmentUnsupported(_) | OfflineError::Internal(_)
        )
    }

    /// Map an engine failure during a request to the matching variant.
    pub(crate) fn from_engine(asset_id: &AssetId, error: BridgeError) -> Self {
        match error {
            BridgeError::NotAvailable(message) => OfflineError::EnvironmentUnsupported(message),
            other => OfflineError::EngineError {
                asset_id: asset_id.clone(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        let id = AssetId::from("a");
        assert!(OfflineError::AlreadyInFlight(id.clone()).is_recoverable());
        assert!(OfflineError::StaleLocation {
            path: PathBuf::from("/gone")
        }
        .is_recoverable());
        assert!(!OfflineError::EnvironmentUnsupported("simulator".to_string()).is_recoverable());
    }

    #[test]
    fn test_from_engine_classification() {
        let id = AssetId::from("a");
        let unsupported =
            OfflineError::from_engine(&id, BridgeError::NotAvailable("no engine".to_string()));
        assert!(matches!(unsupported, OfflineError::EnvironmentUnsupported(_)));

        let failed =
            OfflineError::from_engine(&id, BridgeError::OperationFailed("queue full".to_string()));
        match failed {
            OfflineError::EngineError { asset_id, message } => {
                assert_eq!(asset_id, id);
                assert!(message.contains("queue full"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
