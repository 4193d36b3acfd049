//! Domain models for the mirrored library
//!
//! Everything here is plain serde data. Snapshots are written as pretty JSON with
//! deterministic key order (`BTreeMap`), so two syncs that observe the same
//! remote state produce byte-identical files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of the liked-songs collection inside [`LibraryIndex`] and search results.
pub const LIKED_SONGS_ID: &str = "__liked_songs__";

/// Display name used for the liked-songs collection.
pub const LIKED_SONGS_NAME: &str = "Liked Songs";

/// Current on-disk format of [`LibraryIndex`].
pub const INDEX_FORMAT_VERSION: u32 = 1;

// =============================================================================
// ID Types
// =============================================================================

/// Remote playlist identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(String);

impl PlaylistId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The fixed sentinel used for liked songs.
    pub fn liked_songs() -> Self {
        Self(LIKED_SONGS_ID.to_string())
    }

    pub fn is_liked_songs(&self) -> bool {
        self.0 == LIKED_SONGS_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaylistId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlaylistId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Remote track identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Local folder identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(pub Uuid);

impl FolderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tracks and entries
// =============================================================================

/// Track metadata, stored once per snapshot and referenced by entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<u32>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// When this mirror first saw the track.
    pub first_seen_at: DateTime<Utc>,
}

impl Track {
    /// Artist names joined for display.
    pub fn artists_display(&self) -> String {
        self.artists.join(", ")
    }

    /// Metadata equality ignoring `first_seen_at`.
    pub fn same_metadata(&self, other: &Track) -> bool {
        Track {
            first_seen_at: other.first_seen_at,
            ..self.clone()
        } == *other
    }
}

/// One occurrence of a track in a playlist. The same track may appear at
/// several positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub track_id: TrackId,
    pub position: u32,
    /// Remote add time, or the first time the mirror saw the entry.
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Full ordered record of one playlist as last synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub id: PlaylistId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(default)]
    pub collaborative: bool,
    /// Opaque remote revision marker at the time of the fetch.
    pub revision: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    /// Set once the playlist disappeared from the remote listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    pub tracks: BTreeMap<TrackId, Track>,
    pub entries: Vec<PlaylistEntry>,
}

/// Liked songs share the playlist shape under [`LIKED_SONGS_ID`]. Their revision
/// is derived from the remote total, see [`liked_songs_revision`].
pub type LikedSongsSnapshot = PlaylistSnapshot;

/// Revision marker recorded for liked songs with `total` remote entries.
pub fn liked_songs_revision(total: u32) -> String {
    format!("count:{}", total)
}

impl PlaylistSnapshot {
    pub fn new(id: PlaylistId, name: impl Into<String>, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            owner: Owner::default(),
            public: None,
            collaborative: false,
            revision: None,
            last_synced_at,
            removed_at: None,
            tracks: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    /// Empty liked-songs snapshot for `total` remote entries.
    pub fn liked_songs(total: u32, last_synced_at: DateTime<Utc>) -> Self {
        let mut snapshot = Self::new(PlaylistId::liked_songs(), LIKED_SONGS_NAME, last_synced_at);
        snapshot.revision = Some(liked_songs_revision(total));
        snapshot
    }

    /// Appends `track` at the next position. Track metadata is stored once.
    pub fn push_entry(&mut self, track: Track, added_at: DateTime<Utc>, added_by: Option<String>) {
        let position = self.entries.len() as u32;
        let track_id = track.id.clone();
        self.tracks.entry(track_id.clone()).or_insert(track);
        self.entries.push(PlaylistEntry {
            track_id,
            position,
            added_at,
            added_by,
        });
    }

    pub fn track_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_tombstoned(&self) -> bool {
        self.removed_at.is_some()
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    /// Track identifiers in persisted order, duplicates included.
    pub fn track_sequence(&self) -> Vec<TrackId> {
        self.entries.iter().map(|e| e.track_id.clone()).collect()
    }

    /// Entries paired with their track metadata, in order.
    pub fn ordered_tracks(&self) -> impl Iterator<Item = (&PlaylistEntry, &Track)> + '_ {
        self.entries
            .iter()
            .filter_map(move |entry| self.tracks.get(&entry.track_id).map(|t| (entry, t)))
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.ordered_tracks().map(|(_, t)| t.duration_ms).sum()
    }

    /// Structural checks applied to every snapshot read from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("Playlist id cannot be empty".to_string());
        }

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.position as usize != index {
                return Err(format!(
                    "Entry {} has position {}; positions must be contiguous from 0",
                    index, entry.position
                ));
            }
            if !self.tracks.contains_key(&entry.track_id) {
                return Err(format!(
                    "Entry {} references unknown track {}",
                    index, entry.track_id
                ));
            }
        }

        for (id, track) in &self.tracks {
            if &track.id != id {
                return Err(format!("Track table key {} does not match track id {}", id, track.id));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Library index
// =============================================================================

/// Pointer to one persisted snapshot, small enough to load without the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub revision: Option<String>,
    pub track_count: u32,
    pub last_synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    /// Snapshot file relative to the store root.
    pub file: String,
}

impl IndexEntry {
    pub fn for_snapshot(snapshot: &PlaylistSnapshot, file: impl Into<String>) -> Self {
        Self {
            name: snapshot.name.clone(),
            revision: snapshot.revision.clone(),
            track_count: snapshot.track_count(),
            last_synced_at: snapshot.last_synced_at,
            removed_at: snapshot.removed_at,
            file: file.into(),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.removed_at.is_some()
    }
}

/// Top-level persisted root of the mirror.
///
/// The index is a value: the sync engine receives it, applies updates one at a
/// time, and each committed change bumps [`generation`](Self::generation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryIndex {
    pub format_version: u32,
    pub generation: u64,
    pub playlists: BTreeMap<PlaylistId, IndexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked_songs: Option<IndexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_backup_at: Option<DateTime<Utc>>,
}

impl Default for LibraryIndex {
    fn default() -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            generation: 0,
            playlists: BTreeMap::new(),
            liked_songs: None,
            last_full_backup_at: None,
        }
    }
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PlaylistId) -> Option<&IndexEntry> {
        if id.is_liked_songs() {
            self.liked_songs.as_ref()
        } else {
            self.playlists.get(id)
        }
    }

    pub fn contains(&self, id: &PlaylistId) -> bool {
        self.get(id).is_some()
    }

    /// Known and not tombstoned.
    pub fn is_live(&self, id: &PlaylistId) -> bool {
        self.get(id).is_some_and(|entry| !entry.is_tombstoned())
    }

    /// Playlist identifiers that are not tombstoned, in key order.
    pub fn live_playlists(&self) -> impl Iterator<Item = (&PlaylistId, &IndexEntry)> + '_ {
        self.playlists.iter().filter(|(_, e)| !e.is_tombstoned())
    }

    /// Records a persisted snapshot pointer. Liked songs go to their own slot.
    pub fn record(&mut self, id: PlaylistId, entry: IndexEntry) {
        if id.is_liked_songs() {
            self.liked_songs = Some(entry);
        } else {
            self.playlists.insert(id, entry);
        }
        self.generation += 1;
    }

    /// Forgets the stored revision so the next sync refetches the playlist.
    pub fn invalidate(&mut self, id: &PlaylistId) -> bool {
        let slot = if id.is_liked_songs() {
            self.liked_songs.as_mut()
        } else {
            self.playlists.get_mut(id)
        };

        match slot {
            Some(entry) if entry.revision.is_some() => {
                entry.revision = None;
                self.generation += 1;
                true
            }
            _ => false,
        }
    }

    pub fn mark_full_backup(&mut self, at: DateTime<Utc>) {
        self.last_full_backup_at = Some(at);
        self.generation += 1;
    }
}

// =============================================================================
// Sync log
// =============================================================================

/// One line of the persisted sync history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub job_id: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub unchanged: u32,
    pub updated: u32,
    pub new: u32,
    pub tombstoned: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub full_backup_recorded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}
