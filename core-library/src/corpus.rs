//! Fully loaded view of the mirror used by the read side (search, export,
//! statistics).

use crate::error::Result;
use crate::export::{export_rows, ExportRow, ExportScope};
use crate::models::{LibraryIndex, PlaylistId, PlaylistSnapshot};
use crate::search::SearchIndex;
use crate::stats::LibraryStats;
use crate::store::SnapshotStore;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A snapshot that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    pub playlist_id: PlaylistId,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LibraryCorpus {
    pub index: LibraryIndex,
    pub playlists: BTreeMap<PlaylistId, PlaylistSnapshot>,
    pub liked_songs: Option<PlaylistSnapshot>,
}

/// Result of [`LibraryCorpus::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub corpus: LibraryCorpus,
    /// Corrupt snapshots are left out of the corpus and listed here.
    pub corrupt: Vec<CorruptRecord>,
}

impl LibraryCorpus {
    /// Loads every snapshot named by `index`. Corrupt or missing bodies are
    /// treated as absent; only I/O failures abort the load.
    pub async fn load(store: &dyn SnapshotStore, index: LibraryIndex) -> Result<LoadedCorpus> {
        let mut playlists = BTreeMap::new();
        let mut corrupt = Vec::new();

        for id in index.playlists.keys() {
            match store.read_playlist(id).await {
                Ok(snapshot) => {
                    playlists.insert(id.clone(), snapshot);
                }
                Err(err) if err.is_corrupt() || err.is_not_found() => {
                    warn!(playlist_id = %id, error = %err, "Snapshot unavailable, leaving it out");
                    corrupt.push(CorruptRecord {
                        playlist_id: id.clone(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let liked_songs = if index.liked_songs.is_some() {
            match store.read_liked_songs().await {
                Ok(snapshot) => Some(snapshot),
                Err(err) if err.is_corrupt() || err.is_not_found() => {
                    warn!(error = %err, "Liked songs unavailable, leaving them out");
                    corrupt.push(CorruptRecord {
                        playlist_id: PlaylistId::liked_songs(),
                        message: err.to_string(),
                    });
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        debug!(
            playlists = playlists.len(),
            liked_songs = liked_songs.is_some(),
            corrupt = corrupt.len(),
            "Corpus loaded"
        );

        Ok(LoadedCorpus {
            corpus: LibraryCorpus {
                index,
                playlists,
                liked_songs,
            },
            corrupt,
        })
    }

    pub fn playlist(&self, id: &PlaylistId) -> Option<&PlaylistSnapshot> {
        if id.is_liked_songs() {
            self.liked_songs.as_ref()
        } else {
            self.playlists.get(id)
        }
    }

    pub fn search_index(&self) -> SearchIndex {
        SearchIndex::build(self.playlists.values(), self.liked_songs.as_ref())
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats::compute(
            self.playlists.values(),
            self.liked_songs.as_ref(),
            self.index.last_full_backup_at,
        )
    }

    /// Lazily enumerates rows for `scope`. An unknown playlist yields no rows.
    pub fn export_rows(&self, scope: &ExportScope) -> Box<dyn Iterator<Item = ExportRow> + '_> {
        match scope {
            ExportScope::Library => Box::new(export_rows(
                self.playlists.values().chain(self.liked_songs.as_ref()),
            )),
            ExportScope::Playlist(id) => Box::new(export_rows(self.playlist(id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexEntry, Track, TrackId};
    use crate::store::FileSnapshotStore;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn track(id: &str, title: &str) -> Track {
        Track {
            id: TrackId::new(id),
            uri: None,
            title: title.to_string(),
            artists: vec!["Artist".to_string()],
            album: "Album".to_string(),
            album_id: None,
            duration_ms: 10,
            track_number: None,
            disc_number: None,
            explicit: false,
            is_local: false,
            release_date: None,
            first_seen_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    async fn seeded() -> (TempDir, FileSnapshotStore, LibraryIndex) {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut index = LibraryIndex::new();

        for (id, title) in [("a", "Alpha"), ("b", "Beta")] {
            let mut snapshot = PlaylistSnapshot::new(id.into(), id.to_uppercase(), at);
            snapshot.push_entry(track(id, title), at, None);
            let entry = store.write_playlist(&snapshot).await.unwrap();
            index.record(id.into(), entry);
        }

        let mut liked = PlaylistSnapshot::liked_songs(1, at);
        liked.push_entry(track("l", "Gamma"), at, None);
        let entry = store.write_liked_songs(&liked).await.unwrap();
        index.record(PlaylistId::liked_songs(), entry);

        (dir, store, index)
    }

    #[tokio::test]
    async fn test_load_and_export_library() {
        let (_dir, store, index) = seeded().await;
        let loaded = LibraryCorpus::load(&store, index).await.unwrap();
        assert!(loaded.corrupt.is_empty());

        let corpus = loaded.corpus;
        let titles: Vec<String> = corpus
            .export_rows(&ExportScope::Library)
            .map(|r| r.track_title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);

        let one: Vec<ExportRow> = corpus
            .export_rows(&ExportScope::Playlist("b".into()))
            .collect();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].playlist_name, "B");

        assert_eq!(corpus.export_rows(&ExportScope::Playlist("zzz".into())).count(), 0);
        assert_eq!(corpus.stats().unique_tracks, 3);
        assert!(!corpus.search_index().search("gamma").is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_left_out() {
        let (dir, store, mut index) = seeded().await;
        std::fs::write(dir.path().join("playlists/a.json"), b"{").unwrap();
        index.record(
            "ghost".into(),
            IndexEntry::for_snapshot(
                &PlaylistSnapshot::new("ghost".into(), "Ghost", Utc::now()),
                "playlists/ghost.json",
            ),
        );

        let loaded = LibraryCorpus::load(&store, index).await.unwrap();
        let ids: Vec<&str> = loaded
            .corrupt
            .iter()
            .map(|c| c.playlist_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "ghost"]);
        assert_eq!(loaded.corpus.playlists.len(), 1);
        assert!(loaded.corpus.playlist(&"b".into()).is_some());
    }
}
