//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for durable key-value storage and for the
//! small slice of file system access the offline core needs: checking that a
//! downloaded asset still exists and removing it.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS: Application container (downloads land in `.movpkg` bundles)
/// - Android: App-specific external or internal files directory
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn purge(fs: &dyn FileSystemAccess, path: &Path) -> Result<()> {
///     if fs.exists(path).await? {
///         fs.remove_path(path).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's data directory
    ///
    /// Download locations are recorded relative to this directory so they keep
    /// resolving when the OS moves the application container.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// Delete whatever lives at `path`, file or directory.
    ///
    /// Adaptive-stream downloads are frequently stored as package directories.
    async fn remove_path(&self, path: &Path) -> Result<()> {
        if self.metadata(path).await?.is_directory {
            self.delete_dir_all(path).await
        } else {
            self.delete_file(path).await
        }
    }
}

/// Durable key-value storage trait
///
/// Abstracts application-scoped persistent storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite table
///
/// Values are opaque blobs. A single `set` or `remove` must be atomic with
/// respect to a concurrent `get` of the same key; no atomicity is required
/// across keys.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember(store: &dyn KeyValueStore) -> Result<()> {
///     store.set("offline.location.episode-1", Bytes::from_static(b"{}")).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value, `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// List all keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Check if a key exists
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
