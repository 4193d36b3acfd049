use crate::models::PlaylistSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Library-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub playlists: usize,
    pub tombstoned_playlists: usize,
    pub playlist_entries: usize,
    pub liked_songs: usize,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    pub unique_albums: usize,
    pub total_duration_ms: u64,
    pub last_full_backup_at: Option<DateTime<Utc>>,
}

impl LibraryStats {
    /// Counts over live and tombstoned playlists plus liked songs. Tracks,
    /// artists and albums are counted once however often they appear.
    pub fn compute<'a>(
        playlists: impl IntoIterator<Item = &'a PlaylistSnapshot>,
        liked_songs: Option<&'a PlaylistSnapshot>,
        last_full_backup_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut stats = LibraryStats {
            last_full_backup_at,
            ..Default::default()
        };
        let mut tracks = HashSet::new();
        let mut artists = HashSet::new();
        let mut albums = HashSet::new();

        let mut visit = |snapshot: &'a PlaylistSnapshot, stats: &mut LibraryStats| {
            for (_, track) in snapshot.ordered_tracks() {
                if tracks.insert(&track.id) {
                    stats.total_duration_ms += track.duration_ms;
                }
                for artist in &track.artists {
                    artists.insert(artist.trim().to_lowercase());
                }
                if !track.album.trim().is_empty() {
                    albums.insert(track.album.trim().to_lowercase());
                }
            }
        };

        for snapshot in playlists {
            stats.playlists += 1;
            if snapshot.is_tombstoned() {
                stats.tombstoned_playlists += 1;
            }
            stats.playlist_entries += snapshot.entries.len();
            visit(snapshot, &mut stats);
        }
        if let Some(liked) = liked_songs {
            stats.liked_songs = liked.entries.len();
            visit(liked, &mut stats);
        }

        stats.unique_tracks = tracks.len();
        stats.unique_artists = artists.len();
        stats.unique_albums = albums.len();
        stats
    }
}
