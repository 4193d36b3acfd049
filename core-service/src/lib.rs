//! Core service façade and bootstrap helpers.
//!
//! This crate wires a remote source, the snapshot store, the sync engine, the
//! folder organizer and the search index into one [`MirrorService`]. Desktop
//! hosts typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop` and `provider-spotify`) and call [`bootstrap_spotify`];
//! tests and other hosts hand their own [`bridge_traits::RemoteSource`] to
//! [`MirrorService::builder`].

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{MirrorService, MirrorServiceBuilder};

pub use core_library::{
    ExportRow, ExportScope, FolderId, FolderTreeView, LibraryIndex, LibraryStats, PlaylistId,
    PlaylistSnapshot, SearchHit, SearchOptions, SearchScope,
};
pub use core_runtime::{CoreEvent, MirrorConfig};
pub use core_sync::{PlaylistOutcome, SyncMode, SyncReport};

/// Convenience bootstrapper for desktop hosts talking to Spotify.
///
/// `access_token` must already be valid; obtaining and refreshing it is the
/// host's job.
///
/// ```ignore
/// use core_service::{bootstrap_spotify, MirrorConfig, SyncMode};
///
/// let config = MirrorConfig::builder().backup_dir("./SpotifyBackup").build()?;
/// let mirror = bootstrap_spotify(config, token).await?;
/// let report = mirror.sync_library(SyncMode::Incremental).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_spotify(
    config: MirrorConfig,
    access_token: impl Into<String>,
) -> Result<MirrorService> {
    use std::sync::Arc;

    let http_client = Arc::new(bridge_desktop::ReqwestHttpClient::with_timeout(
        config.request_timeout(),
    )?);
    let connector = provider_spotify::SpotifyConnector::new(http_client, access_token)
        .with_request_timeout(config.request_timeout());

    MirrorService::builder(config)
        .remote(Arc::new(connector))
        .build()
        .await
}
