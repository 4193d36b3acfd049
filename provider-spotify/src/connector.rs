//! Spotify Web API connector implementation
//!
//! Implements the `RemoteSource` trait on top of an injected `HttpClient`.
//! Each trait call issues exactly one request except `list_playlists`, which
//! pages through the whole listing. Retries are left to the sync engine.

use async_trait::async_trait;
use bridge_traits::error::{RemoteError, RemoteResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::remote::{
    LikedSongsPage, RemoteEntry, RemoteOwner, RemotePlaylist, RemoteSource, RemoteTrack, TrackPage,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SpotifyError};
use crate::types::{
    ErrorResponse, Paging, PlaylistTrackItem, SavedTrackItem, SimplifiedPlaylist, TrackObject,
};

/// Spotify Web API base URL
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Page size for `/me/playlists` and `/me/tracks` (API maximum)
const LIBRARY_PAGE_SIZE: u32 = 50;

/// Page size for `/playlists/{id}/tracks` (API maximum)
const PLAYLIST_TRACKS_PAGE_SIZE: u32 = 100;

/// Fields requested for playlist items
const PLAYLIST_TRACK_FIELDS: &str = "items(added_at,added_by.id,is_local,track(id,uri,name,artists(name),album(id,name,release_date),duration_ms,track_number,disc_number,explicit,is_local)),next,total";

/// Owner id of playlists curated by Spotify itself
const SERVICE_OWNER_ID: &str = "spotify";

/// Wait assumed when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Spotify Web API connector
///
/// # Example
///
/// ```ignore
/// use provider_spotify::SpotifyConnector;
/// use bridge_traits::remote::RemoteSource;
///
/// let connector = SpotifyConnector::new(http_client, access_token);
/// let playlists = connector.list_playlists().await?;
/// ```
pub struct SpotifyConnector {
    http_client: Arc<dyn HttpClient>,

    /// OAuth access token with `playlist-read-private`,
    /// `playlist-read-collaborative` and `user-library-read`
    access_token: String,

    base_url: String,

    request_timeout: Option<Duration>,
}

impl SpotifyConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, access_token: impl Into<String>) -> Self {
        Self {
            http_client,
            access_token: access_token.into(),
            base_url: SPOTIFY_API_BASE.to_string(),
            request_timeout: None,
        }
    }

    /// Points the connector at another API root, e.g. a local proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Deadline passed to the HTTP client with every request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Resolves the URL to request: `first` for a fresh listing, the cursor
    /// otherwise. Cursors are the absolute `next` URLs Spotify hands out and
    /// must stay under the API root.
    fn page_url(&self, cursor: Option<String>, first: impl FnOnce() -> String) -> Result<String> {
        match cursor {
            None => Ok(first()),
            Some(next) if next.starts_with(&format!("{}/", self.base_url)) => Ok(next),
            Some(other) => Err(SpotifyError::InvalidCursor(other)),
        }
    }

    fn playlist_tracks_url(&self, playlist_id: &str) -> String {
        format!(
            "{}/playlists/{}/tracks?limit={}&fields={}",
            self.base_url,
            urlencoding::encode(playlist_id),
            PLAYLIST_TRACKS_PAGE_SIZE,
            urlencoding::encode(PLAYLIST_TRACK_FIELDS)
        )
    }

    /// Issues one GET and maps the status to a typed error.
    #[instrument(skip(self), fields(url = %url))]
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = HttpRequest::get(url)
            .bearer_token(&self.access_token)
            .header("Accept", "application/json");
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(Self::status_error(&response, url));
        }

        debug!(status = response.status, bytes = response.body.len(), "API request succeeded");
        serde_json::from_slice(&response.body)
            .map_err(|e| SpotifyError::ParseError(format!("{}: {}", url, e)))
    }

    fn status_error(response: &HttpResponse, url: &str) -> SpotifyError {
        let status = response.status;
        let message = serde_json::from_slice::<ErrorResponse>(&response.body)
            .map(|body| body.error.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned());

        match status {
            429 => {
                let retry_after_seconds = response
                    .header("Retry-After")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                warn!(retry_after_seconds, "Spotify rate limit hit");
                SpotifyError::RateLimitExceeded {
                    retry_after_seconds,
                }
            }
            401 => SpotifyError::AuthenticationFailed(message),
            404 => SpotifyError::NotFound(url.to_string()),
            500..=599 => SpotifyError::ServerError {
                status_code: status,
                message,
            },
            _ => SpotifyError::ApiError {
                status_code: status,
                message,
            },
        }
    }

    fn convert_playlist(playlist: SimplifiedPlaylist) -> RemotePlaylist {
        let service_owned = playlist.owner.id.eq_ignore_ascii_case(SERVICE_OWNER_ID);
        RemotePlaylist {
            id: playlist.id,
            name: playlist.name,
            description: playlist.description.filter(|d| !d.is_empty()),
            owner: RemoteOwner {
                id: playlist.owner.id,
                display_name: playlist.owner.display_name,
            },
            revision: playlist.snapshot_id.filter(|s| !s.is_empty()),
            total_tracks: playlist.tracks.and_then(|t| t.total),
            collaborative: playlist.collaborative,
            public: playlist.public,
            service_owned,
        }
    }

    fn convert_track(track: TrackObject, item_is_local: bool) -> RemoteTrack {
        let (album, album_id, release_date) = match track.album {
            Some(album) => (album.name, album.id, album.release_date),
            None => (String::new(), None, None),
        };
        RemoteTrack {
            // local files carry no id; the engine derives one from the URI
            id: track.id.unwrap_or_default(),
            uri: track.uri,
            title: track.name,
            artists: track
                .artists
                .into_iter()
                .map(|a| a.name)
                .filter(|n| !n.is_empty())
                .collect(),
            album,
            album_id,
            duration_ms: track.duration_ms,
            track_number: track.track_number,
            disc_number: track.disc_number,
            explicit: track.explicit,
            is_local: track.is_local || item_is_local,
            release_date,
        }
    }

    fn parse_timestamp(rfc3339: Option<&str>) -> Option<DateTime<Utc>> {
        rfc3339
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn convert_playlist_item(item: PlaylistTrackItem) -> Option<RemoteEntry> {
        let track = item.track?;
        Some(RemoteEntry {
            track: Self::convert_track(track, item.is_local),
            added_at: Self::parse_timestamp(item.added_at.as_deref()),
            added_by: item.added_by.map(|u| u.id).filter(|id| !id.is_empty()),
        })
    }

    fn convert_saved_item(item: SavedTrackItem) -> Option<RemoteEntry> {
        let track = item.track?;
        Some(RemoteEntry {
            track: Self::convert_track(track, false),
            added_at: Self::parse_timestamp(item.added_at.as_deref()),
            added_by: None,
        })
    }
}

#[async_trait]
impl RemoteSource for SpotifyConnector {
    #[instrument(skip(self))]
    async fn list_playlists(&self) -> RemoteResult<Vec<RemotePlaylist>> {
        let mut url = format!("{}/me/playlists?limit={}", self.base_url, LIBRARY_PAGE_SIZE);
        let mut followed = HashSet::new();
        let mut playlists = Vec::new();

        loop {
            let page: Paging<SimplifiedPlaylist> = self.get_json(&url).await?;
            playlists.extend(page.items.into_iter().flatten().map(Self::convert_playlist));

            match page.next {
                None => break,
                Some(next) => {
                    if !followed.insert(next.clone()) {
                        return Err(RemoteError::Malformed(format!(
                            "playlist listing repeated page {}",
                            next
                        )));
                    }
                    url = self.page_url(Some(next), String::new)?;
                }
            }
        }

        info!(count = playlists.len(), "Listed playlists from Spotify");
        Ok(playlists)
    }

    #[instrument(skip(self, cursor))]
    async fn list_liked_songs(&self, cursor: Option<String>) -> RemoteResult<LikedSongsPage> {
        let url = self.page_url(cursor, || {
            format!("{}/me/tracks?limit={}", self.base_url, LIBRARY_PAGE_SIZE)
        })?;
        let page: Paging<SavedTrackItem> = self.get_json(&url).await?;

        Ok(LikedSongsPage {
            entries: page
                .items
                .into_iter()
                .flatten()
                .filter_map(Self::convert_saved_item)
                .collect(),
            next_cursor: page.next,
            total: page.total,
        })
    }

    #[instrument(skip(self, cursor), fields(playlist_id = %playlist_id))]
    async fn list_playlist_tracks(
        &self,
        playlist_id: &str,
        cursor: Option<String>,
    ) -> RemoteResult<TrackPage> {
        let url = self.page_url(cursor, || self.playlist_tracks_url(playlist_id))?;
        let page: Paging<PlaylistTrackItem> = self.get_json(&url).await.map_err(|e| match e {
            SpotifyError::NotFound(_) => SpotifyError::NotFound(playlist_id.to_string()),
            other => other,
        })?;

        Ok(TrackPage {
            entries: page
                .items
                .into_iter()
                .flatten()
                .filter_map(Self::convert_playlist_item)
                .collect(),
            next_cursor: page.next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
            async fn is_connected(&self) -> bool;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn connector(mock_http: MockHttpClient) -> SpotifyConnector {
        SpotifyConnector::new(Arc::new(mock_http), "test_token")
    }

    #[tokio::test]
    async fn test_list_playlists_follows_next_and_marks_service_playlists() {
        let mut mock_http = MockHttpClient::new();

        mock_http
            .expect_execute()
            .withf(|req| req.url == "https://api.spotify.com/v1/me/playlists?limit=50")
            .times(1)
            .returning(|req| {
                assert_eq!(
                    req.headers.get("Authorization"),
                    Some(&"Bearer test_token".to_string())
                );
                Ok(response(
                    200,
                    r#"{
                        "items": [
                            {"id": "p1", "name": "Road Trip", "description": "",
                             "owner": {"id": "me"}, "snapshot_id": "s1",
                             "tracks": {"total": 12}, "collaborative": true, "public": false},
                            null
                        ],
                        "next": "https://api.spotify.com/v1/me/playlists?offset=50&limit=50",
                        "total": 2
                    }"#,
                ))
            });
        mock_http
            .expect_execute()
            .withf(|req| req.url.ends_with("offset=50&limit=50"))
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{
                        "items": [
                            {"id": "p2", "name": "Discover Weekly",
                             "owner": {"id": "spotify", "display_name": "Spotify"},
                             "snapshot_id": "s9"}
                        ],
                        "next": null
                    }"#,
                ))
            });

        let playlists = connector(mock_http).list_playlists().await.unwrap();

        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[0].id, "p1");
        assert_eq!(playlists[0].revision.as_deref(), Some("s1"));
        assert_eq!(playlists[0].total_tracks, Some(12));
        assert_eq!(playlists[0].description, None);
        assert!(playlists[0].collaborative);
        assert!(!playlists[0].service_owned);
        assert!(playlists[1].service_owned);
    }

    #[tokio::test]
    async fn test_list_playlist_tracks_maps_entries() {
        let mut mock_http = MockHttpClient::new();

        mock_http
            .expect_execute()
            .withf(|req| {
                req.url.starts_with("https://api.spotify.com/v1/playlists/p1/tracks?limit=100&fields=")
            })
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{
                        "items": [
                            {"added_at": "2023-02-01T08:30:00Z", "added_by": {"id": "friend"},
                             "track": {"id": "t1", "uri": "spotify:track:t1", "name": "Midnight City",
                                       "artists": [{"name": "M83"}],
                                       "album": {"id": "a1", "name": "Hurry Up, We're Dreaming", "release_date": "2011-10-18"},
                                       "duration_ms": 243960, "track_number": 2, "disc_number": 1, "explicit": false}},
                            {"added_at": null, "track": null},
                            {"added_at": "2023-02-02T08:30:00Z", "is_local": true,
                             "track": {"id": null, "uri": "spotify:local:Me:Demos:Sketch:61", "name": "Sketch",
                                       "artists": [{"name": "Me"}], "album": {"name": "Demos"}, "duration_ms": 61000}}
                        ],
                        "next": "https://api.spotify.com/v1/playlists/p1/tracks?offset=100&limit=100"
                    }"#,
                ))
            });

        let page = connector(mock_http)
            .list_playlist_tracks("p1", None)
            .await
            .unwrap();

        assert_eq!(page.entries.len(), 2);
        let first = &page.entries[0];
        assert_eq!(first.track.id, "t1");
        assert_eq!(first.track.artists, vec!["M83".to_string()]);
        assert_eq!(first.track.album_id.as_deref(), Some("a1"));
        assert_eq!(first.added_by.as_deref(), Some("friend"));
        assert_eq!(
            first.added_at,
            Some(DateTime::parse_from_rfc3339("2023-02-01T08:30:00Z").unwrap().with_timezone(&Utc))
        );

        let local = &page.entries[1];
        assert_eq!(local.track.id, "");
        assert!(local.track.is_local);
        assert_eq!(local.track.uri.as_deref(), Some("spotify:local:Me:Demos:Sketch:61"));
        assert_eq!(
            page.next_cursor.as_deref(),
            Some("https://api.spotify.com/v1/playlists/p1/tracks?offset=100&limit=100")
        );
    }

    #[tokio::test]
    async fn test_cursor_is_requested_verbatim() {
        let next = "https://api.spotify.com/v1/me/tracks?offset=50&limit=50";
        let mut mock_http = MockHttpClient::new();

        mock_http
            .expect_execute()
            .withf(move |req| req.url == next)
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{"items": [{"added_at": "2024-01-01T00:00:00Z",
                                   "track": {"id": "t9", "name": "Song", "duration_ms": 1000}}],
                        "next": null, "total": 51}"#,
                ))
            });

        let page = connector(mock_http)
            .list_liked_songs(Some(next.to_string()))
            .await
            .unwrap();

        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.total, Some(51));
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.entries[0].added_by, None);
    }

    #[tokio::test]
    async fn test_foreign_cursor_is_rejected() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(0);

        let result = connector(mock_http)
            .list_liked_songs(Some("https://evil.example.com/v1/me/tracks".into()))
            .await;

        assert!(matches!(result, Err(RemoteError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|_| {
            let mut throttled = response(429, "");
            throttled
                .headers
                .insert("retry-after".to_string(), "4".to_string());
            Ok(throttled)
        });

        let result = connector(mock_http).list_playlist_tracks("p1", None).await;

        assert_eq!(
            result.unwrap_err(),
            RemoteError::RateLimited {
                retry_after: Duration::from_secs(4)
            }
        );
    }

    async fn error_for(status: u16) -> RemoteError {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(move |_| {
            Ok(response(
                status,
                r#"{"error": {"status": 0, "message": "The access token expired"}}"#,
            ))
        });
        connector(mock_http)
            .list_playlist_tracks("gone", None)
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(
            error_for(429).await,
            RemoteError::RateLimited {
                retry_after: Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)
            }
        );
        assert_eq!(
            error_for(401).await,
            RemoteError::Unauthorized("The access token expired".into())
        );
        assert_eq!(error_for(404).await, RemoteError::NotFound("gone".into()));
        assert!(matches!(error_for(502).await, RemoteError::Transient(_)));
        assert_eq!(
            error_for(403).await,
            RemoteError::Rejected {
                status: 403,
                message: "The access token expired".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unparseable_body_is_malformed() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, "<html>maintenance</html>")));

        let result = connector(mock_http).list_playlists().await;

        assert!(matches!(result, Err(RemoteError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_transport_timeout_is_remote_timeout() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Timeout("30s".into())));

        let result = connector(mock_http).list_liked_songs(None).await;

        assert_eq!(result.unwrap_err(), RemoteError::Timeout);
    }

    #[tokio::test]
    async fn test_custom_base_url_and_timeout() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .withf(|req| {
                req.url == "http://localhost:8080/v1/me/tracks?limit=50"
                    && req.timeout == Some(Duration::from_secs(5))
            })
            .times(1)
            .returning(|_| Ok(response(200, r#"{"items": [], "next": null, "total": 0}"#)));

        let connector = connector(mock_http)
            .with_base_url("http://localhost:8080/v1/")
            .with_request_timeout(Duration::from_secs(5));
        let page = connector.list_liked_songs(None).await.unwrap();

        assert!(page.entries.is_empty());
        assert_eq!(page.total, Some(0));
    }
}
