//! Read-only row projection consumed by tabular exporters.

use crate::models::{PlaylistId, PlaylistSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One playlist entry flattened for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub playlist_id: PlaylistId,
    pub playlist_name: String,
    pub position: u32,
    pub track_title: String,
    /// Artist names joined with `", "`.
    pub artists: String,
    pub album: String,
    pub added_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub uri: Option<String>,
    /// The playlist was removed remotely and is kept as history.
    pub playlist_removed: bool,
}

/// What to enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ExportScope {
    /// Every playlist, tombstoned ones included, then liked songs.
    #[default]
    Library,
    Playlist(PlaylistId),
}

/// Rows of one snapshot, in persisted order.
pub fn snapshot_rows(snapshot: &PlaylistSnapshot) -> impl Iterator<Item = ExportRow> + '_ {
    snapshot.ordered_tracks().map(move |(entry, track)| ExportRow {
        playlist_id: snapshot.id.clone(),
        playlist_name: snapshot.name.clone(),
        position: entry.position,
        track_title: track.title.clone(),
        artists: track.artists_display(),
        album: track.album.clone(),
        added_at: entry.added_at,
        duration_ms: track.duration_ms,
        uri: track.uri.clone(),
        playlist_removed: snapshot.is_tombstoned(),
    })
}

/// Lazily chains the rows of several snapshots.
pub fn export_rows<'a>(
    snapshots: impl IntoIterator<Item = &'a PlaylistSnapshot> + 'a,
) -> impl Iterator<Item = ExportRow> + 'a {
    snapshots.into_iter().flat_map(snapshot_rows)
}
