//! # Persistence Store
//!
//! Durable mapping from asset id to the location of its finished download.
//!
//! Entries are JSON blobs under `<prefix><asset id>` in the host key-value
//! store; other keys in the same store are left alone. The whole [`Asset`]
//! is stored next to the location so completed downloads can be listed after
//! a restart without the caller re-supplying them.

use bridge_traits::{Clock, FileSystemAccess, KeyValueStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::asset::{Asset, AssetId};
use crate::error::{OfflineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Anchor {
    /// Relative to the application data directory
    DataDir,
    Absolute,
}

/// Opaque, durable reference to a downloaded asset on disk.
///
/// Locations inside the application data directory are recorded relative to
/// it, so they keep resolving when the OS moves the application container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationToken {
    anchor: Anchor,
    path: String,
}

/// What is persisted for each downloaded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub asset: Asset,
    pub token: LocationToken,
    pub downloaded_at: DateTime<Utc>,
}

/// Key-value backed store of download locations.
pub struct LocationStore {
    kv: Arc<dyn KeyValueStore>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl LocationStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            fs,
            clock,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &AssetId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Build a token for a location reported by the download engine.
    ///
    /// Fails with [`OfflineError::UnrepresentableLocation`] for paths that are
    /// not valid UTF-8.
    pub async fn token_for(&self, location: &Path) -> Result<LocationToken> {
        let data_dir = self.fs.get_data_directory().await?;
        let unrepresentable = || OfflineError::UnrepresentableLocation {
            path: location.to_path_buf(),
        };

        let token = match location.strip_prefix(&data_dir) {
            Ok(relative) => {
                let mut parts = Vec::new();
                for component in relative.components() {
                    if let Component::Normal(part) = component {
                        parts.push(part.to_str().ok_or_else(unrepresentable)?);
                    }
                }
                LocationToken {
                    anchor: Anchor::DataDir,
                    path: parts.join("/"),
                }
            }
            Err(_) => LocationToken {
                anchor: Anchor::Absolute,
                path: location.to_str().ok_or_else(unrepresentable)?.to_string(),
            },
        };

        Ok(token)
    }

    /// Rebuild the current path for `token`.
    ///
    /// Fails with [`OfflineError::StaleLocation`] when nothing exists there anymore.
    pub async fn resolve(&self, token: &LocationToken) -> Result<PathBuf> {
        let path = match token.anchor {
            Anchor::DataDir => {
                let mut path = self.fs.get_data_directory().await?;
                path.extend(token.path.split('/').filter(|part| !part.is_empty()));
                path
            }
            Anchor::Absolute => PathBuf::from(&token.path),
        };

        if !self.fs.exists(&path).await? {
            return Err(OfflineError::StaleLocation { path });
        }

        Ok(path)
    }

    /// Persist `token` as the location of `asset`, replacing any previous entry.
    pub async fn put(&self, asset: &Asset, token: LocationToken) -> Result<PersistedEntry> {
        let entry = PersistedEntry {
            asset: asset.clone(),
            token,
            downloaded_at: self.clock.now(),
        };

        let blob = serde_json::to_vec(&entry)?;
        self.kv.set(&self.key(&asset.id), Bytes::from(blob)).await?;

        debug!(asset_id = %asset.id, "Persisted download location");
        Ok(entry)
    }

    /// Fetch the entry for `id`.
    ///
    /// A value that no longer decodes is reported as [`OfflineError::Serialization`].
    pub async fn get(&self, id: &AssetId) -> Result<Option<PersistedEntry>> {
        match self.kv.get(&self.key(id)).await? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    pub async fn contains(&self, id: &AssetId) -> Result<bool> {
        Ok(self.kv.contains(&self.key(id)).await?)
    }

    /// Remove the entry for `id`; removing an absent entry is not an error.
    pub async fn remove(&self, id: &AssetId) -> Result<()> {
        self.kv.remove(&self.key(id)).await?;
        debug!(asset_id = %id, "Removed download location");
        Ok(())
    }

    /// Ids of every persisted entry, sorted.
    pub async fn asset_ids(&self) -> Result<Vec<AssetId>> {
        let mut ids: Vec<AssetId> = self
            .kv
            .list_keys()
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(self.prefix.as_str())
                    .filter(|id| !id.is_empty())
                    .map(AssetId::from)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}
