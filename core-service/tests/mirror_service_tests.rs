//! End-to-end tests for the mirror façade: sync, search, folders, export and
//! statistics against a scripted remote and a temp-dir store.

use async_trait::async_trait;
use bridge_traits::{
    FixedClock, LikedSongsPage, RemoteEntry, RemoteError, RemoteOwner, RemotePlaylist,
    RemoteResult, RemoteSource, RemoteTrack, TrackPage,
};
use chrono::{TimeZone, Utc};
use core_library::{EntityKind, LibraryError};
use core_runtime::config::RetrySettings;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_service::{
    CoreError, ExportScope, MirrorConfig, MirrorService, PlaylistId, PlaylistOutcome,
    SearchOptions, SearchScope, SyncMode,
};
use mockall::mock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

// ============================================================================
// Remotes
// ============================================================================

#[derive(Default)]
struct Library {
    playlists: Vec<RemotePlaylist>,
    tracks: HashMap<String, Vec<RemoteEntry>>,
    liked: Vec<RemoteEntry>,
}

/// Single-page remote library. With a gate set, the listing waits for it.
#[derive(Default)]
struct ScriptedRemote {
    library: Mutex<Library>,
    gate: Mutex<Option<Arc<Notify>>>,
}

fn entry(id: &str, title: &str, artist: &str, album: &str) -> RemoteEntry {
    RemoteEntry::new(RemoteTrack::new(
        id,
        title,
        vec![artist.to_string()],
        album,
        240_000,
    ))
}

impl ScriptedRemote {
    fn with_gate(gate: Arc<Notify>) -> Self {
        Self {
            gate: Mutex::new(Some(gate)),
            ..Self::default()
        }
    }

    /// Makes the next listings wait until the returned gate is notified.
    fn hold_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn set_playlist(&self, id: &str, name: &str, revision: &str, entries: Vec<RemoteEntry>) {
        let mut library = self.library.lock().unwrap();
        library.playlists.retain(|p| p.id != id);
        library.playlists.push(
            RemotePlaylist::new(id, name, RemoteOwner::new("me")).with_revision(revision),
        );
        library.tracks.insert(id.to_string(), entries);
    }

    fn remove_playlist(&self, id: &str) {
        self.library.lock().unwrap().playlists.retain(|p| p.id != id);
    }

    fn set_liked(&self, entries: Vec<RemoteEntry>) {
        self.library.lock().unwrap().liked = entries;
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn list_playlists(&self) -> RemoteResult<Vec<RemotePlaylist>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.library.lock().unwrap().playlists.clone())
    }

    async fn list_liked_songs(&self, _cursor: Option<String>) -> RemoteResult<LikedSongsPage> {
        let library = self.library.lock().unwrap();
        Ok(LikedSongsPage {
            entries: library.liked.clone(),
            next_cursor: None,
            total: Some(library.liked.len() as u32),
        })
    }

    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        _cursor: Option<String>,
    ) -> RemoteResult<TrackPage> {
        let library = self.library.lock().unwrap();
        let entries = library
            .tracks
            .get(playlist_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(playlist_id.to_string()))?;
        Ok(TrackPage {
            entries,
            next_cursor: None,
        })
    }
}

mock! {
    Remote {}

    #[async_trait]
    impl RemoteSource for Remote {
        async fn list_playlists(&self) -> RemoteResult<Vec<RemotePlaylist>>;
        async fn list_liked_songs(&self, cursor: Option<String>) -> RemoteResult<LikedSongsPage>;
        async fn list_playlist_tracks(&self, playlist_id: &str, cursor: Option<String>) -> RemoteResult<TrackPage>;
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config(dir: &Path) -> MirrorConfig {
    MirrorConfig::builder()
        .backup_dir(dir)
        .retry(RetrySettings {
            max_attempts: 2,
            base_wait_ms: 1,
            max_wait_ms: 2,
            jitter_ms: 0,
            throttle_margin_ms: 0,
        })
        .build()
        .unwrap()
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 9, 1, 20, 0, 0).unwrap(),
    ))
}

async fn open(dir: &Path, remote: Arc<dyn RemoteSource>) -> MirrorService {
    MirrorService::builder(config(dir))
        .remote(remote)
        .clock(clock())
        .build()
        .await
        .unwrap()
}

fn seeded_remote() -> Arc<ScriptedRemote> {
    let remote = Arc::new(ScriptedRemote::default());
    remote.set_playlist(
        "night",
        "Night Drive",
        "r1",
        vec![
            entry("t1", "Midnight City", "M83", "Hurry Up, We're Dreaming"),
            entry("t2", "Nightcall", "Kavinsky", "OutRun"),
        ],
    );
    remote.set_playlist(
        "gym",
        "Gym",
        "r1",
        vec![
            entry("t3", "Stronger", "Kanye West", "Graduation"),
            entry("t1", "Midnight City", "M83", "Hurry Up, We're Dreaming"),
        ],
    );
    remote.set_liked(vec![entry("t2", "Nightcall", "Kavinsky", "OutRun")]);
    remote
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_builder_requires_remote_source() {
    let dir = TempDir::new().unwrap();
    let result = MirrorService::builder(config(dir.path())).build().await;

    assert!(matches!(
        result,
        Err(CoreError::CapabilityMissing { ref capability, .. }) if capability == "RemoteSource"
    ));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.max_concurrent_fetches = 0;

    let result = MirrorService::builder(config)
        .remote(seeded_remote())
        .build()
        .await;

    assert!(matches!(result, Err(CoreError::Config(_))));
}

#[tokio::test]
async fn test_sync_then_search() {
    let dir = TempDir::new().unwrap();
    let mirror = open(dir.path(), seeded_remote()).await;
    assert!(mirror.search("midnight").await.is_empty());

    let mut events = mirror.subscribe();
    let report = mirror.sync_library(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.summary().new, 3);

    for query in ["midnight", "m83", "City"] {
        let hits = mirror.search(query).await;
        assert!(
            hits.iter()
                .any(|h| h.kind == EntityKind::Track && h.id == "t1"),
            "no track hit for {:?}",
            query
        );
    }
    assert!(mirror.search("Daylight").await.is_empty());

    let track = mirror
        .search("midnight city")
        .await
        .into_iter()
        .find(|h| h.kind == EntityKind::Track)
        .unwrap();
    assert_eq!(track.playlists.len(), 2);

    let liked_only = mirror
        .search_with("m83", &SearchOptions::default().scope(SearchScope::LikedSongs))
        .await;
    assert!(liked_only.is_empty());

    let mut rebuilt = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoreEvent::Library(LibraryEvent::IndexRebuilt { .. })) {
            rebuilt = true;
        }
    }
    assert!(rebuilt);
}

#[tokio::test]
async fn test_listing_failure_surfaces_as_sync_error() {
    let dir = TempDir::new().unwrap();
    let mut remote = MockRemote::new();
    remote
        .expect_list_playlists()
        .times(1)
        .returning(|| Err(RemoteError::Unauthorized("token expired".into())));
    remote.expect_list_playlist_tracks().times(0);
    remote.expect_list_liked_songs().times(0);

    let mirror = open(dir.path(), Arc::new(remote)).await;
    let result = mirror.sync_library(SyncMode::Full).await;

    assert!(matches!(result, Err(CoreError::Sync(_))));
    assert!(!mirror.is_syncing());
    assert!(mirror.index().await.playlists.is_empty());
}

#[tokio::test]
async fn test_second_sync_is_rejected_and_cancel_stops_the_first() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let remote = Arc::new(ScriptedRemote::with_gate(gate.clone()));
    remote.set_playlist("a", "A", "r1", vec![entry("t1", "One", "X", "Y")]);
    let mirror = open(dir.path(), remote).await;

    let background = mirror.clone();
    let first = tokio::spawn(async move { background.sync_library(SyncMode::Full).await });
    while !mirror.is_syncing() {
        tokio::task::yield_now().await;
    }

    let second = mirror.sync_library(SyncMode::Incremental).await;
    assert!(second.unwrap_err().is_sync_in_progress());

    assert!(mirror.cancel_sync());
    gate.notify_one();
    let report = first.await.unwrap().unwrap();

    assert!(report
        .playlists
        .iter()
        .all(|p| p.outcome == PlaylistOutcome::Cancelled));
    assert!(!report.full_backup_recorded);
    assert!(!mirror.is_syncing());
    assert!(!mirror.cancel_sync());
}

#[tokio::test]
async fn test_folders_survive_sync_and_reopen() {
    let dir = TempDir::new().unwrap();
    let remote = seeded_remote();
    let mirror = open(dir.path(), remote.clone()).await;
    mirror.sync_library(SyncMode::Incremental).await.unwrap();

    let moods = mirror.create_folder("Moods", None).await.unwrap();
    let late = mirror.create_folder("Late", Some(moods)).await.unwrap();
    assert!(mirror
        .assign_playlist(PlaylistId::new("night"), late)
        .await
        .unwrap());
    assert!(!mirror
        .assign_playlist(PlaylistId::new("night"), late)
        .await
        .unwrap());

    // cycle rejected, tree unchanged
    let before = mirror.folder_tree().await;
    let err = mirror.move_folder(moods, Some(late)).await.unwrap_err();
    assert!(matches!(err, CoreError::Library(LibraryError::Cycle { .. })));
    assert_eq!(mirror.folder_tree().await, before);

    remote.remove_playlist("night");
    mirror.sync_library(SyncMode::Incremental).await.unwrap();

    let view = mirror.list_tree().await;
    let late_node = &view.roots[0].children[0];
    assert_eq!(late_node.name, "Late");
    assert_eq!(late_node.playlists.len(), 1);
    assert!(late_node.playlists[0].stale);
    assert!(view.unfiled.iter().any(|p| p.id.as_str() == "gym"));

    mirror.rename_folder(moods, "Vibes").await.unwrap();
    drop(mirror);

    let reopened = open(dir.path(), remote).await;
    let view = reopened.list_tree().await;
    assert_eq!(view.roots[0].name, "Vibes");
    assert_eq!(view.roots[0].children[0].playlists[0].id.as_str(), "night");

    reopened.delete_folder(moods).await.unwrap();
    let view = reopened.list_tree().await;
    assert_eq!(view.roots.len(), 1);
    assert_eq!(view.roots[0].name, "Late");
}

#[tokio::test]
async fn test_export_and_statistics() {
    let dir = TempDir::new().unwrap();
    let remote = seeded_remote();
    let mirror = open(dir.path(), remote.clone()).await;
    mirror.sync_library(SyncMode::Full).await.unwrap();

    let rows = mirror.export_rows(&ExportScope::Library).await.unwrap();
    assert_eq!(rows.len(), 5);

    let night = mirror
        .export_rows(&ExportScope::Playlist(PlaylistId::new("night")))
        .await
        .unwrap();
    let titles: Vec<&str> = night.iter().map(|r| r.track_title.as_str()).collect();
    assert_eq!(titles, vec!["Midnight City", "Nightcall"]);
    assert_eq!(night[0].playlist_name, "Night Drive");

    let stats = mirror.statistics().await.unwrap();
    assert_eq!(stats.playlists, 2);
    assert_eq!(stats.liked_songs, 1);
    assert_eq!(stats.unique_tracks, 3);
    assert_eq!(stats.unique_artists, 3);
    assert!(stats.last_full_backup_at.is_some());

    remote.remove_playlist("gym");
    mirror.sync_library(SyncMode::Incremental).await.unwrap();
    let stats = mirror.statistics().await.unwrap();
    assert_eq!(stats.tombstoned_playlists, 1);

    let gym = mirror.playlist(&PlaylistId::new("gym")).await.unwrap().unwrap();
    assert!(gym.is_tombstoned());
    assert!(mirror.playlist(&PlaylistId::new("nope")).await.unwrap().is_none());
    assert_eq!(mirror.liked_songs().await.unwrap().unwrap().track_count(), 1);

    let log = mirror.sync_log().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].tombstoned, 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_invalidated_on_open() {
    let dir = TempDir::new().unwrap();
    let remote = seeded_remote();
    let mirror = open(dir.path(), remote.clone()).await;
    mirror.sync_library(SyncMode::Incremental).await.unwrap();
    drop(mirror);

    std::fs::write(dir.path().join("playlists/gym.json"), b"not json").unwrap();

    let events = EventBus::new(32);
    let mut rx = events.subscribe();
    let mirror = MirrorService::builder(config(dir.path()))
        .remote(remote)
        .clock(clock())
        .events(events)
        .build()
        .await
        .unwrap();

    let mut reported = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Library(LibraryEvent::SnapshotCorrupt { playlist_id, .. }) = event {
            reported.push(playlist_id);
        }
    }
    assert_eq!(reported, vec!["gym".to_string()]);
    assert_eq!(
        mirror.index().await.get(&PlaylistId::new("gym")).unwrap().revision,
        None
    );
    // search still works for what loaded
    assert!(!mirror.search("nightcall").await.is_empty());

    let report = mirror.sync_library(SyncMode::Incremental).await.unwrap();
    assert!(matches!(
        report.outcome(&PlaylistId::new("gym")),
        Some(PlaylistOutcome::Updated(_))
    ));
    assert_eq!(
        mirror.playlist(&PlaylistId::new("gym")).await.unwrap().unwrap().track_count(),
        2
    );
}

#[tokio::test]
async fn test_reads_during_sync_leave_the_index_file_alone() {
    let dir = TempDir::new().unwrap();
    let remote = seeded_remote();
    let mirror = open(dir.path(), remote.clone()).await;
    mirror.sync_library(SyncMode::Incremental).await.unwrap();

    std::fs::write(dir.path().join("playlists/gym.json"), b"not json").unwrap();
    remote.set_playlist(
        "late",
        "Late Night",
        "r1",
        vec![entry("t4", "Intro", "The xx", "xx")],
    );
    let gate = remote.hold_listing();

    let background = mirror.clone();
    let sync = tokio::spawn(async move { background.sync_library(SyncMode::Incremental).await });
    while !mirror.is_syncing() {
        tokio::task::yield_now().await;
    }

    let index_file = dir.path().join("index.json");
    let before = std::fs::read(&index_file).unwrap();
    let rows = mirror.export_rows(&ExportScope::Library).await.unwrap();
    assert!(rows.iter().all(|r| r.playlist_id.as_str() != "gym"));
    mirror.statistics().await.unwrap();
    assert_eq!(std::fs::read(&index_file).unwrap(), before);

    gate.notify_one();
    let report = sync.await.unwrap().unwrap();
    assert!(matches!(
        report.outcome(&PlaylistId::new("late")),
        Some(PlaylistOutcome::New { .. })
    ));
    drop(mirror);

    // the sync's commit carries the new playlist and the invalidated one
    let reopened = open(dir.path(), remote).await;
    let index = reopened.index().await;
    assert!(index.get(&PlaylistId::new("late")).is_some());
    assert_eq!(index.get(&PlaylistId::new("gym")).unwrap().revision, None);
}
