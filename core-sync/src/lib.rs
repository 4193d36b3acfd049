//! # Sync Module
//!
//! Keeps the local mirror current with the remote playlist library.
//!
//! ## Components
//!
//! - **Sync Engine** (`engine`): plans, fetches, diffs and persists playlists on a
//!   bounded worker pool, applying index updates from a single coordinator
//! - **Diff** (`diff`): position-aware sequence comparison of track listings
//! - **Retry Policy** (`retry`): bounded retries with throttling waits and backoff
//! - **Pager** (`pager`): explicit cursor-carrying pagination
//! - **Report** (`report`): per-playlist outcomes of one run

pub mod diff;
pub mod engine;
pub mod error;
pub mod pager;
pub mod report;
pub mod retry;

pub use diff::{diff_sequences, ChangeCounts, Move, PlaylistDiff};
pub use engine::{SyncConfig, SyncEngine, EXCLUDED_BY_FILTERS, NOT_IN_LISTING};
pub use error::{FetchError, Result, SyncError};
pub use pager::{Page, Pager};
pub use report::{PlaylistOutcome, PlaylistReport, SyncMode, SyncReport, SyncSummary};
pub use retry::RetryPolicy;
