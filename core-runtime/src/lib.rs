//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every playlist mirror crate:
//! - Configuration management
//! - Logging and tracing infrastructure
//! - Event bus system
//!
//! ## Overview
//!
//! Nothing in here knows about playlists or snapshots. The crate fixes the
//! conventions the domain crates rely on: how settings are validated, how
//! `tracing` output is filtered and forwarded, and how progress is broadcast.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{MirrorConfig, MirrorConfigBuilder, PlaylistFilters, RetrySettings};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream, LibraryEvent, SyncEvent};
