//! Manylla Core Library
//!
//! Shared functionality for Manylla sync components:
//! - Child profile data model and photo exclusion for sync
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types and time helpers

pub mod config;
pub mod error;
pub mod profile;
pub mod time;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use profile::{CategoryConfig, ChildProfile, Entry, PhotoRef, SyncSnapshot};
