//! # Desktop Bridge Implementations
//!
//! Default implementations of the storage bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`
//! - `KeyValueStore` using a single SQLite table via `sqlx`, optionally opened
//!   lazily so it can be handed out from synchronous configuration code
//!
//! Desktop has no native adaptive-stream download engine; hosts supply their
//! own `DownloadEngine` (or a test double) alongside these.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{SqliteKeyValueStore, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let store = SqliteKeyValueStore::new("/tmp/offline-downloads.db".into())
//!         .await
//!         .unwrap();
//!
//!     // Use in core configuration
//! }
//! ```

mod filesystem;
mod kv_store;

pub use filesystem::TokioFileSystem;
pub use kv_store::{LazySqliteKeyValueStore, SqliteKeyValueStore};
