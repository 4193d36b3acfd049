//! Remote Source Adapter contract
//!
//! Paginated, read-only access to a streaming service library. Implementations
//! perform a single request per call; the sync engine owns retries, timeouts and
//! driving cursors to exhaustion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteResult;

/// Owner of a remote playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOwner {
    pub id: String,
    pub display_name: Option<String>,
}

impl RemoteOwner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// One row of the top-level playlist listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: RemoteOwner,
    /// Opaque revision marker. `None` means the source offers no usable signal
    /// and the playlist must always be compared in full.
    pub revision: Option<String>,
    pub total_tracks: Option<u32>,
    pub collaborative: bool,
    pub public: Option<bool>,
    /// Curated by the service itself rather than a user.
    pub service_owned: bool,
}

impl RemotePlaylist {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner: RemoteOwner) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            owner,
            revision: None,
            total_tracks: None,
            collaborative: false,
            public: None,
            service_owned: false,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// Track metadata as delivered by the remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub uri: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_id: Option<String>,
    pub duration_ms: u64,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub explicit: bool,
    pub is_local: bool,
    pub release_date: Option<String>,
}

impl RemoteTrack {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artists: Vec<String>,
        album: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            uri: None,
            title: title.into(),
            artists,
            album: album.into(),
            album_id: None,
            duration_ms,
            track_number: None,
            disc_number: None,
            explicit: false,
            is_local: false,
            release_date: None,
        }
    }
}

/// A track's membership in a listing, in remote order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub track: RemoteTrack,
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,
}

impl RemoteEntry {
    pub fn new(track: RemoteTrack) -> Self {
        Self {
            track,
            added_at: None,
            added_by: None,
        }
    }
}

/// One page of a playlist's track listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackPage {
    pub entries: Vec<RemoteEntry>,
    /// `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// One page of the liked-songs collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikedSongsPage {
    pub entries: Vec<RemoteEntry>,
    pub next_cursor: Option<String>,
    /// Total size of the collection, when the source reports it.
    pub total: Option<u32>,
}

/// Read access to a remote playlist library.
///
/// # Example
///
/// ```ignore
/// let playlists = remote.list_playlists().await?;
/// let mut cursor = None;
/// loop {
///     let page = remote.list_playlist_tracks(&playlists[0].id, cursor).await?;
///     cursor = page.next_cursor;
///     if cursor.is_none() {
///         break;
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Full top-level listing with each playlist's revision marker.
    async fn list_playlists(&self) -> RemoteResult<Vec<RemotePlaylist>>;

    /// One page of liked songs starting at `cursor` (`None` for the first page).
    async fn list_liked_songs(&self, cursor: Option<String>) -> RemoteResult<LikedSongsPage>;

    /// One page of a playlist's tracks starting at `cursor`.
    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        cursor: Option<String>,
    ) -> RemoteResult<TrackPage>;
}
