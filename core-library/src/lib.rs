//! # Library Module
//!
//! Owns the local mirror of the remote playlist library.
//!
//! ## Overview
//!
//! This module manages:
//! - The data model: tracks, playlist snapshots, liked songs, the versioned
//!   [`LibraryIndex`]
//! - The snapshot store: atomic, human-readable JSON records on disk
//! - Virtual folders grouping playlists locally
//! - The in-memory search index, export rows and library statistics

pub mod corpus;
pub mod error;
pub mod export;
pub mod folders;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;

pub use corpus::{CorruptRecord, LibraryCorpus, LoadedCorpus};
pub use error::{LibraryError, Result};
pub use export::{ExportRow, ExportScope};
pub use folders::{Folder, FolderNode, FolderTree, FolderTreeView, PlaylistRef};
pub use models::{
    FolderId, IndexEntry, LibraryIndex, LikedSongsSnapshot, Owner, PlaylistEntry, PlaylistId,
    PlaylistSnapshot, SyncLogEntry, Track, TrackId,
};
pub use search::{EntityKind, SearchHit, SearchIndex, SearchOptions, SearchScope};
pub use stats::LibraryStats;
pub use store::{FileSnapshotStore, SnapshotStore};
