//! Asset model

use bridge_traits::SourceDescriptor;
use core_runtime::events::DownloadState;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{OfflineError, Result};

/// Externally assigned, stable identifier of a downloadable asset.
///
/// Also used as the tag of the native download task, which is how tasks are
/// matched back to assets after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for AssetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AssetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A piece of downloadable streamed media. Owned by the caller; the core
/// only copies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub source: SourceDescriptor,
}

impl Asset {
    pub fn new(id: impl Into<AssetId>, source: SourceDescriptor) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    /// Reject assets the engine could never download.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(OfflineError::InvalidAsset("asset id is empty".to_string()));
        }
        if self.source.url.trim().is_empty() {
            return Err(OfflineError::InvalidAsset(format!(
                "asset {} has an empty source url",
                self.id
            )));
        }
        Ok(())
    }
}

/// Computed download status of an asset. Never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivedState {
    NotDownloaded,
    Downloading { progress: f64 },
    Downloaded,
}

impl DerivedState {
    pub fn download_state(&self) -> DownloadState {
        match self {
            DerivedState::NotDownloaded => DownloadState::NotDownloaded,
            DerivedState::Downloading { .. } => DownloadState::Downloading,
            DerivedState::Downloaded => DownloadState::Downloaded,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            DerivedState::Downloading { progress } => Some(*progress),
            _ => None,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, DerivedState::Downloaded)
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self, DerivedState::Downloading { .. })
    }
}
