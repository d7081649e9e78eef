//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-offline`). Host applications
//! can depend on `offline-media-workspace` and enable the documented features
//! without needing to wire each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_offline as offline;
#[cfg(feature = "desktop-shims")]
pub use core_service as service;
