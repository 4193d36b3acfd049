//! JSON-file implementation of [`SnapshotStore`].
//!
//! Layout under the store root:
//!
//! ```text
//! index.json              LibraryIndex
//! playlists/<id>.json     one PlaylistSnapshot per playlist
//! liked_songs.json        liked songs
//! folders.json            FolderTree
//! history/index-*.json    archived index copies
//! sync_log.json           recent SyncLogEntry records
//! ```

use super::atomic::write_atomic;
use super::SnapshotStore;
use crate::error::{LibraryError, Result};
use crate::folders::FolderTree;
use crate::models::{
    IndexEntry, LibraryIndex, LikedSongsSnapshot, PlaylistId, PlaylistSnapshot, SyncLogEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

const INDEX_FILE: &str = "index.json";
const LIKED_SONGS_FILE: &str = "liked_songs.json";
const FOLDERS_FILE: &str = "folders.json";
const SYNC_LOG_FILE: &str = "sync_log.json";
const PLAYLISTS_DIR: &str = "playlists";
const HISTORY_DIR: &str = "history";
const HISTORY_PREFIX: &str = "index-";

/// Snapshot store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

/// Maps an identifier to a portable file stem. Alphanumerics and `-` pass
/// through; every other byte becomes `_xx`, which keeps the mapping injective.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory layout if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(store.root.join(PLAYLISTS_DIR)).await?;
        fs::create_dir_all(store.root.join(HISTORY_DIR)).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot file of `id`, relative to the root.
    pub fn playlist_file(id: &PlaylistId) -> String {
        format!("{}/{}.json", PLAYLISTS_DIR, file_stem(id.as_str()))
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Reads and parses a record. `Ok(None)` when the file does not exist.
    async fn read_json<T: DeserializeOwned>(&self, relative: &str) -> Result<Option<T>> {
        let path = self.path(relative);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LibraryError::CorruptSnapshot {
                path: relative.to_string(),
                message: e.to_string(),
            })
    }

    async fn write_json<T: Serialize>(&self, relative: &str, value: &T) -> Result<()> {
        let bytes = to_pretty_json(value)?;
        write_atomic(&self.path(relative), &bytes).await?;
        debug!(file = relative, bytes = bytes.len(), "Record written");
        Ok(())
    }

    async fn read_snapshot(&self, relative: &str, id: &PlaylistId) -> Result<PlaylistSnapshot> {
        let snapshot: PlaylistSnapshot = self
            .read_json(relative)
            .await?
            .ok_or_else(|| LibraryError::not_found("playlist", id))?;

        if &snapshot.id != id {
            return Err(LibraryError::CorruptSnapshot {
                path: relative.to_string(),
                message: format!("File holds playlist {} instead of {}", snapshot.id, id),
            });
        }

        snapshot
            .validate()
            .map_err(|message| LibraryError::CorruptSnapshot {
                path: relative.to_string(),
                message,
            })?;
        Ok(snapshot)
    }

    /// Moves an unreadable record aside so it is kept for inspection.
    async fn quarantine(&self, relative: &str) {
        let from = self.path(relative);
        let to = self.path(&format!(
            "{}.corrupt-{}",
            relative,
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        if let Err(err) = fs::rename(&from, &to).await {
            warn!(file = relative, error = %err, "Failed to quarantine corrupt record");
        }
    }

    /// Rebuilds an index from whatever snapshots can still be read.
    #[instrument(skip(self))]
    pub async fn recover_index(&self) -> Result<LibraryIndex> {
        let mut index = LibraryIndex::new();

        let mut dir = match fs::read_dir(self.path(PLAYLISTS_DIR)).await {
            Ok(dir) => Some(dir),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(dir) = dir.as_mut() {
            while let Some(item) = dir.next_entry().await? {
                let name = item.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".json") || name.starts_with('.') {
                    continue;
                }
                let relative = format!("{}/{}", PLAYLISTS_DIR, name);
                match self.read_json::<PlaylistSnapshot>(&relative).await {
                    Ok(Some(snapshot)) if snapshot.validate().is_ok() => {
                        let file = Self::playlist_file(&snapshot.id);
                        let entry = IndexEntry::for_snapshot(&snapshot, file);
                        index.record(snapshot.id.clone(), entry);
                    }
                    Ok(_) => warn!(file = %relative, "Skipping invalid snapshot during recovery"),
                    Err(err) => warn!(file = %relative, error = %err, "Skipping unreadable snapshot"),
                }
            }
        }

        match self.read_json::<PlaylistSnapshot>(LIKED_SONGS_FILE).await {
            Ok(Some(liked)) if liked.validate().is_ok() => {
                let entry = IndexEntry::for_snapshot(&liked, LIKED_SONGS_FILE);
                index.record(PlaylistId::liked_songs(), entry);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Skipping unreadable liked songs during recovery"),
        }

        info!(
            playlists = index.playlists.len(),
            liked_songs = index.liked_songs.is_some(),
            "Index rebuilt from snapshots"
        );
        Ok(index)
    }

    async fn history_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(self.path(HISTORY_DIR)).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with(HISTORY_PREFIX) && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Archived index files, oldest first.
    pub async fn list_history(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .history_files()
            .await?
            .into_iter()
            .map(|name| self.path(HISTORY_DIR).join(name))
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn load(&self) -> Result<LibraryIndex> {
        match self.read_json::<LibraryIndex>(INDEX_FILE).await {
            Ok(Some(index)) => {
                debug!(
                    generation = index.generation,
                    playlists = index.playlists.len(),
                    "Index loaded"
                );
                Ok(index)
            }
            Ok(None) => {
                let index = self.recover_index().await?;
                if index.generation > 0 {
                    self.write_index(&index).await?;
                }
                Ok(index)
            }
            Err(LibraryError::CorruptSnapshot { message, .. }) => {
                warn!(error = %message, "Index is corrupt, rebuilding from snapshots");
                self.quarantine(INDEX_FILE).await;
                let index = self.recover_index().await?;
                self.write_index(&index).await?;
                Ok(index)
            }
            Err(err) => Err(err),
        }
    }

    async fn write_index(&self, index: &LibraryIndex) -> Result<()> {
        self.write_json(INDEX_FILE, index).await
    }

    async fn read_playlist(&self, id: &PlaylistId) -> Result<PlaylistSnapshot> {
        if id.is_liked_songs() {
            return self.read_liked_songs().await;
        }
        self.read_snapshot(&Self::playlist_file(id), id).await
    }

    #[instrument(skip(self, snapshot), fields(playlist_id = %snapshot.id, tracks = snapshot.entries.len()))]
    async fn write_playlist(&self, snapshot: &PlaylistSnapshot) -> Result<IndexEntry> {
        if snapshot.id.is_liked_songs() {
            return self.write_liked_songs(snapshot).await;
        }
        let file = Self::playlist_file(&snapshot.id);
        self.write_json(&file, snapshot).await?;
        Ok(IndexEntry::for_snapshot(snapshot, file))
    }

    async fn read_liked_songs(&self) -> Result<LikedSongsSnapshot> {
        self.read_snapshot(LIKED_SONGS_FILE, &PlaylistId::liked_songs())
            .await
    }

    async fn write_liked_songs(&self, snapshot: &LikedSongsSnapshot) -> Result<IndexEntry> {
        if !snapshot.id.is_liked_songs() {
            return Err(LibraryError::InvalidInput {
                field: "id".to_string(),
                message: format!("{} is not the liked songs collection", snapshot.id),
            });
        }
        self.write_json(LIKED_SONGS_FILE, snapshot).await?;
        Ok(IndexEntry::for_snapshot(snapshot, LIKED_SONGS_FILE))
    }

    async fn load_folders(&self) -> Result<FolderTree> {
        let loaded = match self.read_json::<FolderTree>(FOLDERS_FILE).await {
            Ok(tree) => tree,
            Err(LibraryError::CorruptSnapshot { message, .. }) => {
                warn!(error = %message, "Folder file is unreadable, starting with an empty tree");
                self.quarantine(FOLDERS_FILE).await;
                None
            }
            Err(err) => return Err(err),
        };

        match loaded {
            Some(tree) => match tree.validate() {
                Ok(()) => Ok(tree),
                Err(message) => {
                    warn!(error = %message, "Folder tree is inconsistent, starting with an empty tree");
                    self.quarantine(FOLDERS_FILE).await;
                    Ok(FolderTree::new())
                }
            },
            None => Ok(FolderTree::new()),
        }
    }

    async fn save_folders(&self, tree: &FolderTree) -> Result<()> {
        self.write_json(FOLDERS_FILE, tree).await
    }

    async fn archive_index(
        &self,
        index: &LibraryIndex,
        at: DateTime<Utc>,
        keep: usize,
    ) -> Result<()> {
        let name = format!(
            "{}/{}{}-g{}.json",
            HISTORY_DIR,
            HISTORY_PREFIX,
            at.format("%Y%m%dT%H%M%S%3fZ"),
            index.generation
        );
        self.write_json(&name, index).await?;

        let files = self.history_files().await?;
        let excess = files.len().saturating_sub(keep);
        for old in &files[..excess] {
            let path = self.path(HISTORY_DIR).join(old);
            if let Err(err) = fs::remove_file(&path).await {
                warn!(file = %old, error = %err, "Failed to prune archived index");
            }
        }
        Ok(())
    }

    async fn append_sync_log(&self, entry: SyncLogEntry, keep: usize) -> Result<()> {
        let mut log = self.read_sync_log().await?;
        log.push(entry);
        let excess = log.len().saturating_sub(keep);
        log.drain(..excess);
        self.write_json(SYNC_LOG_FILE, &log).await
    }

    async fn read_sync_log(&self) -> Result<Vec<SyncLogEntry>> {
        match self.read_json::<Vec<SyncLogEntry>>(SYNC_LOG_FILE).await {
            Ok(log) => Ok(log.unwrap_or_default()),
            Err(LibraryError::CorruptSnapshot { message, .. }) => {
                warn!(error = %message, "Sync log is unreadable, starting a new one");
                self.quarantine(SYNC_LOG_FILE).await;
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }
}
