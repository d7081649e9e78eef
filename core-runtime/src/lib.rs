//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline download core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It fixes the logging
//! conventions, the capability-injection configuration, and the broadcast
//! channel through which download state changes reach the application.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
