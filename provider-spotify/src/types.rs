//! Spotify Web API response types
//!
//! Only the fields the mirror stores are declared; everything else in the
//! payloads is ignored. Spotify sends `null` for items it can no longer
//! resolve, so list items are `Option`s.

use serde::Deserialize;

/// Generic paging object.
///
/// See: https://developer.spotify.com/documentation/web-api/concepts/api-calls#pagination
#[derive(Debug, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<Option<T>>,

    /// Absolute URL of the next page, `null` on the last one
    #[serde(default)]
    pub next: Option<String>,

    #[serde(default)]
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksRef {
    #[serde(default)]
    pub total: Option<u32>,
}

/// Simplified playlist object from `GET /me/playlists`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimplifiedPlaylist {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub owner: UserRef,

    /// Playlist version marker, changes on every modification
    #[serde(default)]
    pub snapshot_id: Option<String>,

    #[serde(default)]
    pub tracks: Option<TracksRef>,

    #[serde(default)]
    pub collaborative: bool,

    #[serde(default)]
    pub public: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub release_date: Option<String>,
}

/// Track object. Local files have no `id` and a `spotify:local:` URI.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub artists: Vec<ArtistRef>,

    #[serde(default)]
    pub album: Option<AlbumRef>,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub track_number: Option<u32>,

    #[serde(default)]
    pub disc_number: Option<u32>,

    #[serde(default)]
    pub explicit: bool,

    #[serde(default)]
    pub is_local: bool,
}

/// Item of `GET /playlists/{id}/tracks`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrackItem {
    /// RFC 3339, `null` for very old additions
    #[serde(default)]
    pub added_at: Option<String>,

    #[serde(default)]
    pub added_by: Option<UserRef>,

    #[serde(default)]
    pub is_local: bool,

    #[serde(default)]
    pub track: Option<TrackObject>,
}

/// Item of `GET /me/tracks`.
#[derive(Debug, Clone, Deserialize)]
pub struct SavedTrackItem {
    #[serde(default)]
    pub added_at: Option<String>,

    #[serde(default)]
    pub track: Option<TrackObject>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}
