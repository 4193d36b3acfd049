//! # Search Index
//!
//! In-memory inverted index over the mirrored corpus. It is rebuilt wholesale
//! from the snapshots after every sync and never patched in place.
//!
//! Terms are case-folded, trimmed and split on whitespace. A query term matches
//! an index term when it is a substring of it, so `"city"` finds
//! `"Midnight City"` and `"8"` finds `"M83"`.
//!
//! Results are ranked by the number of distinct query terms matched, then by
//! entity kind (track, artist, album, playlist), then by insertion order.

use crate::models::{PlaylistId, PlaylistSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Track,
    Artist,
    Album,
    Playlist,
}

impl EntityKind {
    /// Lower ranks first.
    fn priority(self) -> u8 {
        match self {
            EntityKind::Track => 0,
            EntityKind::Artist => 1,
            EntityKind::Album => 2,
            EntityKind::Playlist => 3,
        }
    }
}

/// Which part of the corpus a search looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    All,
    /// Playlists and everything reachable from them.
    Playlists,
    /// Only what appears in liked songs.
    LikedSongs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub scope: SearchScope,
    /// Maximum number of hits, `None` for all.
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            scope: SearchScope::All,
            limit: Some(50),
        }
    }
}

impl SearchOptions {
    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub kind: EntityKind,
    /// Track id, playlist id, or the normalized artist/album name.
    pub id: String,
    pub label: String,
    /// Secondary display text (artists and album for tracks).
    pub detail: Option<String>,
    pub matched_terms: usize,
    /// Names of the playlists this entity appears in.
    pub playlists: Vec<String>,
    pub in_liked_songs: bool,
}

#[derive(Debug, Clone)]
struct Entity {
    kind: EntityKind,
    id: String,
    label: String,
    detail: Option<String>,
    playlists: Vec<String>,
    in_playlists: bool,
    in_liked_songs: bool,
}

impl Entity {
    fn in_scope(&self, scope: SearchScope) -> bool {
        match scope {
            SearchScope::All => true,
            SearchScope::Playlists => self.in_playlists,
            SearchScope::LikedSongs => self.in_liked_songs,
        }
    }

    fn to_hit(&self, matched_terms: usize) -> SearchHit {
        SearchHit {
            kind: self.kind,
            id: self.id.clone(),
            label: self.label.clone(),
            detail: self.detail.clone(),
            matched_terms,
            playlists: self.playlists.clone(),
            in_liked_songs: self.in_liked_songs,
        }
    }
}

/// Where an entity was seen while building.
#[derive(Clone, Copy)]
enum Source<'a> {
    Playlist(&'a str),
    LikedSongs,
}

/// Case-folded, whitespace-delimited terms of `text`.
pub fn normalize_terms(text: &str) -> Vec<String> {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct SearchIndex {
    terms: BTreeMap<String, BTreeSet<usize>>,
    entities: Vec<Entity>,
    lookup: HashMap<(EntityKind, String), usize>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index in a single pass. Playlists are visited in the given
    /// order, then liked songs.
    pub fn build<'a>(
        playlists: impl IntoIterator<Item = &'a PlaylistSnapshot>,
        liked_songs: Option<&'a PlaylistSnapshot>,
    ) -> Self {
        let mut index = Self::new();
        for snapshot in playlists {
            index.add_playlist(snapshot);
        }
        if let Some(liked) = liked_songs {
            index.add_tracks(liked, Source::LikedSongs);
        }
        index
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn add_playlist(&mut self, snapshot: &PlaylistSnapshot) {
        let slot = self.entity(
            EntityKind::Playlist,
            snapshot.id.as_str().to_string(),
            &snapshot.name,
            snapshot.description.clone(),
        );
        self.entities[slot].in_playlists = true;
        self.register(slot, &snapshot.name);
        if let Some(description) = &snapshot.description {
            self.register(slot, description);
        }

        self.add_tracks(snapshot, Source::Playlist(&snapshot.name));
    }

    fn add_tracks(&mut self, snapshot: &PlaylistSnapshot, source: Source<'_>) {
        for (_, track) in snapshot.ordered_tracks() {
            let artists = track.artists_display();
            let detail = if track.album.is_empty() {
                artists.clone()
            } else {
                format!("{} - {}", artists, track.album)
            };

            let slot = self.entity(
                EntityKind::Track,
                track.id.as_str().to_string(),
                &track.title,
                Some(detail),
            );
            self.mark(slot, source);
            self.register(slot, &track.title);
            for artist in &track.artists {
                self.register(slot, artist);
            }
            self.register(slot, &track.album);

            for artist in &track.artists {
                let slot = self.entity(EntityKind::Artist, artist.trim().to_lowercase(), artist, None);
                self.mark(slot, source);
                self.register(slot, artist);
            }

            if !track.album.trim().is_empty() {
                let slot = self.entity(
                    EntityKind::Album,
                    track.album.trim().to_lowercase(),
                    &track.album,
                    Some(artists),
                );
                self.mark(slot, source);
                self.register(slot, &track.album);
            }
        }
    }

    /// Returns the slot of an entity, inserting it on first sight.
    fn entity(&mut self, kind: EntityKind, id: String, label: &str, detail: Option<String>) -> usize {
        if let Some(&slot) = self.lookup.get(&(kind, id.clone())) {
            return slot;
        }
        let slot = self.entities.len();
        self.entities.push(Entity {
            kind,
            id: id.clone(),
            label: label.to_string(),
            detail,
            playlists: Vec::new(),
            in_playlists: false,
            in_liked_songs: false,
        });
        self.lookup.insert((kind, id), slot);
        slot
    }

    fn mark(&mut self, slot: usize, source: Source<'_>) {
        let entity = &mut self.entities[slot];
        match source {
            Source::Playlist(name) => {
                entity.in_playlists = true;
                if !entity.playlists.iter().any(|p| p == name) {
                    entity.playlists.push(name.to_string());
                }
            }
            Source::LikedSongs => entity.in_liked_songs = true,
        }
    }

    fn register(&mut self, slot: usize, text: &str) {
        for term in normalize_terms(text) {
            self.terms.entry(term).or_default().insert(slot);
        }
    }

    /// Searches everything with the default options.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.search_with(query, &SearchOptions::default().limit(None))
    }

    pub fn search_with(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let mut query_terms = normalize_terms(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut matched: HashMap<usize, usize> = HashMap::new();
        for query_term in &query_terms {
            let slots: BTreeSet<usize> = self
                .terms
                .iter()
                .filter(|(term, _)| term.contains(query_term.as_str()))
                .flat_map(|(_, slots)| slots.iter().copied())
                .collect();
            for slot in slots {
                *matched.entry(slot).or_default() += 1;
            }
        }

        let mut ranked: Vec<(usize, usize)> = matched
            .into_iter()
            .filter(|(slot, _)| self.entities[*slot].in_scope(options.scope))
            .collect();
        ranked.sort_by(|(a_slot, a_count), (b_slot, b_count)| {
            b_count
                .cmp(a_count)
                .then_with(|| {
                    self.entities[*a_slot]
                        .kind
                        .priority()
                        .cmp(&self.entities[*b_slot].kind.priority())
                })
                .then_with(|| a_slot.cmp(b_slot))
        });

        let limit = options.limit.unwrap_or(usize::MAX);
        ranked
            .into_iter()
            .take(limit)
            .map(|(slot, count)| self.entities[slot].to_hit(count))
            .collect()
    }

    /// Playlist ids whose name or description matches every query term.
    pub fn matching_playlists(&self, query: &str) -> Vec<PlaylistId> {
        let wanted = {
            let mut terms = normalize_terms(query);
            terms.sort();
            terms.dedup();
            terms.len()
        };
        self.search_with(query, &SearchOptions::default().limit(None))
            .into_iter()
            .filter(|hit| hit.kind == EntityKind::Playlist && hit.matched_terms == wanted)
            .map(|hit| PlaylistId::new(hit.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Track, TrackId};
    use chrono::{TimeZone, Utc};

    fn track(id: &str, title: &str, artist: &str, album: &str) -> Track {
        Track {
            id: TrackId::new(id),
            uri: None,
            title: title.to_string(),
            artists: vec![artist.to_string()],
            album: album.to_string(),
            album_id: None,
            duration_ms: 240_000,
            track_number: None,
            disc_number: None,
            explicit: false,
            is_local: false,
            release_date: None,
            first_seen_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn playlist(id: &str, name: &str, tracks: Vec<Track>) -> PlaylistSnapshot {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut snapshot = PlaylistSnapshot::new(id.into(), name, now);
        for t in tracks {
            snapshot.push_entry(t, now, None);
        }
        snapshot
    }

    fn library() -> (Vec<PlaylistSnapshot>, PlaylistSnapshot) {
        let drive = playlist(
            "pl-drive",
            "Night Drive",
            vec![
                track("t1", "Midnight City", "M83", "Hurry Up, We're Dreaming"),
                track("t2", "Nightcall", "Kavinsky", "OutRun"),
            ],
        );
        let mut chill = playlist(
            "pl-chill",
            "Sunday Chill",
            vec![track("t1", "Midnight City", "M83", "Hurry Up, We're Dreaming")],
        );
        chill.description = Some("slow city mornings".to_string());

        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let mut liked = PlaylistSnapshot::liked_songs(1, now);
        liked.push_entry(track("t3", "Daydreaming", "Radiohead", "A Moon Shaped Pool"), now, None);

        (vec![drive, chill], liked)
    }

    fn index() -> SearchIndex {
        let (playlists, liked) = library();
        SearchIndex::build(&playlists, Some(&liked))
    }

    #[test]
    fn test_midnight_city_is_found_by_title_and_artist_terms() {
        let index = index();
        for query in ["midnight", "m83", "City"] {
            let hits = index.search(query);
            assert!(
                hits.iter()
                    .any(|h| h.kind == EntityKind::Track && h.id == "t1"),
                "query {:?} should find the track",
                query
            );
        }
        assert!(!index
            .search("Daylight")
            .iter()
            .any(|h| h.id == "t1"));
    }

    #[test]
    fn test_ranking_prefers_more_terms_then_kind() {
        let index = index();

        let hits = index.search("m83");
        assert_eq!(hits[0].kind, EntityKind::Track);
        assert_eq!(hits[1].kind, EntityKind::Artist);
        assert_eq!(hits[1].label, "M83");

        // "midnight city" matches the track on two terms and the chill playlist on one
        let hits = index.search("midnight city");
        assert_eq!(hits[0].id, "t1");
        assert_eq!(hits[0].matched_terms, 2);
        let playlist = hits
            .iter()
            .find(|h| h.kind == EntityKind::Playlist)
            .unwrap();
        assert_eq!(playlist.id, "pl-chill");
        assert_eq!(playlist.matched_terms, 1);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = index();
        let hits = index.search("night");
        let tracks: Vec<&str> = hits
            .iter()
            .filter(|h| h.kind == EntityKind::Track)
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(tracks, vec!["t1", "t2"]);
    }

    #[test]
    fn test_track_hits_carry_playlist_names() {
        let index = index();
        let hit = index
            .search("nightcall")
            .into_iter()
            .find(|h| h.kind == EntityKind::Track)
            .unwrap();
        assert_eq!(hit.playlists, vec!["Night Drive".to_string()]);
        assert!(!hit.in_liked_songs);

        let hit = index
            .search("midnight")
            .into_iter()
            .find(|h| h.id == "t1")
            .unwrap();
        assert_eq!(
            hit.playlists,
            vec!["Night Drive".to_string(), "Sunday Chill".to_string()]
        );
    }

    #[test]
    fn test_scope_filters_liked_songs() {
        let index = index();

        let liked_only = SearchOptions::default().scope(SearchScope::LikedSongs);
        let hits = index.search_with("dream", &liked_only);
        assert!(hits.iter().any(|h| h.id == "t3"));
        assert!(hits.iter().all(|h| h.in_liked_songs));

        let playlists_only = SearchOptions::default().scope(SearchScope::Playlists);
        let hits = index.search_with("radiohead", &playlists_only);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_limit_and_empty_query() {
        let index = index();
        let hits = index.search_with("m", &SearchOptions::default().limit(Some(2)));
        assert_eq!(hits.len(), 2);
        assert!(index.search("   ").is_empty());
    }

    #[test]
    fn test_matching_playlists_uses_descriptions() {
        let index = index();
        assert_eq!(
            index.matching_playlists("mornings"),
            vec![PlaylistId::new("pl-chill")]
        );
        assert_eq!(index.matching_playlists("sunday"), vec![PlaylistId::new("pl-chill")]);
        assert!(index.matching_playlists("sunday drive").is_empty());
    }
}
