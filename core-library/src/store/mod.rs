//! # Snapshot Store
//!
//! Durable, human-readable persistence of the mirror.
//!
//! ## Contract
//!
//! - Every write is atomic per record: the new content goes to a temporary file
//!   in the same directory and is renamed over the old file only after it was
//!   fully written and flushed. A crash leaves the previous record intact.
//! - Writes to different playlists are independent and may run concurrently.
//! - [`SnapshotStore::write_playlist`] persists the body and returns the
//!   [`IndexEntry`] pointing at it. The caller records that pointer in its
//!   [`LibraryIndex`] and then calls [`SnapshotStore::write_index`]; until the
//!   index is written the new snapshot is not considered committed.
//! - The store never deletes a playlist snapshot. Remote removal is recorded as
//!   a tombstone (`removed_at`) by rewriting the snapshot.
//! - Reads distinguish a missing record ([`LibraryError::NotFound`]) from one
//!   that exists but cannot be parsed ([`LibraryError::CorruptSnapshot`]).

mod atomic;
mod fs;

pub use atomic::write_atomic;
pub use fs::FileSnapshotStore;

use crate::error::Result;
use crate::folders::FolderTree;
use crate::models::{
    IndexEntry, LibraryIndex, LikedSongsSnapshot, PlaylistId, PlaylistSnapshot, SyncLogEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the library index. A missing index yields an empty one; a corrupt
    /// index is rebuilt from the snapshots on disk.
    async fn load(&self) -> Result<LibraryIndex>;

    /// Atomically replaces the persisted index.
    async fn write_index(&self, index: &LibraryIndex) -> Result<()>;

    async fn read_playlist(&self, id: &PlaylistId) -> Result<PlaylistSnapshot>;

    /// Persists one playlist and returns its index pointer.
    async fn write_playlist(&self, snapshot: &PlaylistSnapshot) -> Result<IndexEntry>;

    async fn read_liked_songs(&self) -> Result<LikedSongsSnapshot>;

    async fn write_liked_songs(&self, snapshot: &LikedSongsSnapshot) -> Result<IndexEntry>;

    /// Loads the folder tree, empty if none was saved yet.
    async fn load_folders(&self) -> Result<FolderTree>;

    async fn save_folders(&self, tree: &FolderTree) -> Result<()>;

    /// Copies `index` into the history area and keeps the newest `keep` copies.
    async fn archive_index(
        &self,
        index: &LibraryIndex,
        at: DateTime<Utc>,
        keep: usize,
    ) -> Result<()>;

    /// Appends to the sync log, keeping the newest `keep` entries.
    async fn append_sync_log(&self, entry: SyncLogEntry, keep: usize) -> Result<()>;

    async fn read_sync_log(&self) -> Result<Vec<SyncLogEntry>>;
}
