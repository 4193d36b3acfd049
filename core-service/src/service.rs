//! The mirror façade.
//!
//! [`MirrorService`] owns the [`LibraryIndex`] value, the folder tree and the
//! current search index, and hands the index to the sync engine one sync at a
//! time. Read operations (search, export, statistics) never wait for a running
//! sync; they see the state committed by the last one.

use crate::error::{CoreError, Result};
use bridge_traits::{Clock, RemoteSource, SystemClock};
use core_library::{
    CorruptRecord, ExportRow, ExportScope, FileSnapshotStore, FolderId, FolderTree,
    FolderTreeView, LibraryCorpus, LibraryIndex, LibraryStats, PlaylistId, PlaylistSnapshot,
    SearchHit, SearchIndex, SearchOptions, SnapshotStore, SyncLogEntry,
};
use core_runtime::config::MirrorConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_sync::{SyncConfig, SyncEngine, SyncError, SyncMode, SyncReport};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast::Receiver;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Builder for [`MirrorService`].
///
/// Only the remote source is mandatory. The store defaults to a
/// [`FileSnapshotStore`] under `config.backup_dir`, the clock to the system
/// clock and the event bus to one sized by `config.event_buffer_size`.
pub struct MirrorServiceBuilder {
    config: MirrorConfig,
    remote: Option<Arc<dyn RemoteSource>>,
    store: Option<Arc<dyn SnapshotStore>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
}

impl MirrorServiceBuilder {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            remote: None,
            store: None,
            clock: None,
            events: None,
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validates the configuration, opens the store and loads the library.
    pub async fn build(self) -> Result<MirrorService> {
        self.config.validate()?;

        let remote = self.remote.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "RemoteSource".to_string(),
            message: "a remote source is required to sync the library".to_string(),
        })?;

        let store: Arc<dyn SnapshotStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileSnapshotStore::open(&self.config.backup_dir).await?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_buffer_size));

        let engine = SyncEngine::new(remote, store.clone(), clock, SyncConfig::from(&self.config))
            .with_events(events.clone());

        let mut index = store.load().await?;
        let folders = store.load_folders().await?;

        let service = MirrorService {
            inner: Arc::new(Inner {
                config: self.config,
                store,
                engine,
                events,
                index: Mutex::new(LibraryIndex::new()),
                folders: Mutex::new(folders),
                search: RwLock::new(Arc::new(SearchIndex::new())),
                active_sync: StdMutex::new(None),
            }),
        };

        service.refresh_read_side(&mut index).await?;
        *service.inner.index.lock().await = index;

        info!("Mirror service ready");
        Ok(service)
    }
}

struct Inner {
    config: MirrorConfig,
    store: Arc<dyn SnapshotStore>,
    engine: SyncEngine,
    events: EventBus,
    /// Last committed index. A running sync works on a copy.
    index: Mutex<LibraryIndex>,
    folders: Mutex<FolderTree>,
    search: RwLock<Arc<SearchIndex>>,
    active_sync: StdMutex<Option<CancellationToken>>,
}

/// Clears the active sync slot when a sync ends, however it ends.
struct SyncSlot<'a> {
    slot: &'a StdMutex<Option<CancellationToken>>,
}

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct MirrorService {
    inner: Arc<Inner>,
}

impl MirrorService {
    pub fn builder(config: MirrorConfig) -> MirrorServiceBuilder {
        MirrorServiceBuilder::new(config)
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: LibraryEvent) {
        self.inner.events.emit(CoreEvent::Library(event)).ok();
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    fn begin_sync(&self) -> Result<(CancellationToken, SyncSlot<'_>)> {
        let mut active = self
            .inner
            .active_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return Err(SyncError::SyncInProgress.into());
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok((
            token,
            SyncSlot {
                slot: &self.inner.active_sync,
            },
        ))
    }

    /// Synchronizes the whole library. Fails with
    /// [`SyncError::SyncInProgress`] while another sync runs.
    #[instrument(skip(self))]
    pub async fn sync_library(&self, mode: SyncMode) -> Result<SyncReport> {
        let (token, _slot) = self.begin_sync()?;
        let mut working = self.inner.index.lock().await.clone();

        let result = self
            .inner
            .engine
            .sync_library(&mut working, mode, &token)
            .await;
        self.finish_sync(working, result).await
    }

    /// Refreshes only `ids`, see [`SyncEngine::sync_playlists`].
    #[instrument(skip(self), fields(selected = ids.len()))]
    pub async fn sync_playlists(&self, ids: &[PlaylistId]) -> Result<SyncReport> {
        let (token, _slot) = self.begin_sync()?;
        let mut working = self.inner.index.lock().await.clone();

        let result = self
            .inner
            .engine
            .sync_playlists(&mut working, ids, &token)
            .await;
        self.finish_sync(working, result).await
    }

    /// Commits the index a sync worked on, even after a store failure, since
    /// whatever it recorded is already on disk.
    async fn finish_sync(
        &self,
        mut working: LibraryIndex,
        result: core_sync::Result<SyncReport>,
    ) -> Result<SyncReport> {
        if result.is_ok() {
            if let Err(err) = self.refresh_read_side(&mut working).await {
                warn!(error = %err, "Failed to rebuild search index after sync");
            }
        }
        *self.inner.index.lock().await = working;
        Ok(result?)
    }

    /// Requests cancellation of the running sync. Returns `false` when no
    /// sync is running.
    pub fn cancel_sync(&self) -> bool {
        let active = self
            .inner
            .active_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(token) => {
                info!("Sync cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.inner
            .active_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub async fn sync_log(&self) -> Result<Vec<SyncLogEntry>> {
        Ok(self.inner.store.read_sync_log().await?)
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Loads every snapshot named by `index`. Corrupt ones are left out and
    /// reported as events. With `invalidate`, their revisions are cleared and
    /// the index is written so the next sync refetches them.
    async fn load_corpus(&self, index: &mut LibraryIndex, invalidate: bool) -> Result<LibraryCorpus> {
        let loaded = LibraryCorpus::load(self.inner.store.as_ref(), index.clone()).await?;
        if loaded.corrupt.is_empty() {
            return Ok(loaded.corpus);
        }

        let mut changed = false;
        for CorruptRecord {
            playlist_id,
            message,
        } in &loaded.corrupt
        {
            warn!(playlist_id = %playlist_id, error = %message, "Snapshot unavailable, it will be refetched");
            self.emit(LibraryEvent::SnapshotCorrupt {
                playlist_id: playlist_id.to_string(),
                message: message.clone(),
            });
            if invalidate {
                changed |= index.invalidate(playlist_id);
            }
        }
        if !changed {
            return Ok(loaded.corpus);
        }
        self.inner.store.write_index(index).await?;

        let mut corpus = loaded.corpus;
        corpus.index = index.clone();
        Ok(corpus)
    }

    /// Rebuilds the search index from the store. Only called by the index
    /// writer: the builder, or a sync finishing.
    async fn refresh_read_side(&self, index: &mut LibraryIndex) -> Result<()> {
        let corpus = self.load_corpus(index, true).await?;
        let search = corpus.search_index();
        let (entities, terms) = (search.entity_count() as u32, search.term_count() as u32);
        *self.inner.search.write().await = Arc::new(search);

        debug!(entities, terms, "Search index rebuilt");
        self.emit(LibraryEvent::IndexRebuilt { entities, terms });
        Ok(())
    }

    /// Corpus for the read side. While a sync runs it owns `index.json`, so
    /// corrupt snapshots are only reported; the sync's own refresh
    /// invalidates them when it commits.
    async fn corpus(&self) -> Result<LibraryCorpus> {
        let mut index = self.inner.index.lock().await;
        // a sync clones the index under this lock, so it cannot start writing
        // before load_corpus is done
        let invalidate = !self.is_syncing();
        self.load_corpus(&mut index, invalidate).await
    }

    pub async fn index(&self) -> LibraryIndex {
        self.inner.index.lock().await.clone()
    }

    /// Search with the default options (all scopes, first 50 hits).
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        self.search_with(query, &SearchOptions::default()).await
    }

    pub async fn search_with(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let index = self.inner.search.read().await.clone();
        index.search_with(query, options)
    }

    /// Rows for `scope` in playlist order. Tombstoned playlists are included
    /// and flagged.
    pub async fn export_rows(&self, scope: &ExportScope) -> Result<Vec<ExportRow>> {
        let corpus = self.corpus().await?;
        Ok(corpus.export_rows(scope).collect())
    }

    pub async fn statistics(&self) -> Result<LibraryStats> {
        Ok(self.corpus().await?.stats())
    }

    /// The stored snapshot of `id`, `None` if it was never synced.
    pub async fn playlist(&self, id: &PlaylistId) -> Result<Option<PlaylistSnapshot>> {
        match self.inner.store.read_playlist(id).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn liked_songs(&self) -> Result<Option<PlaylistSnapshot>> {
        self.playlist(&PlaylistId::liked_songs()).await
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    /// Applies `change` to a copy of the tree, persists it, then commits.
    /// A failed change or save leaves the tree untouched.
    async fn mutate_folders<T>(
        &self,
        folder_id: FolderId,
        change: impl FnOnce(&mut FolderTree) -> core_library::Result<T>,
    ) -> Result<T> {
        let mut folders = self.inner.folders.lock().await;
        let mut next = folders.clone();
        let out = change(&mut next)?;
        self.inner.store.save_folders(&next).await?;
        *folders = next;

        self.emit(LibraryEvent::FolderChanged {
            folder_id: folder_id.to_string(),
        });
        Ok(out)
    }

    pub async fn create_folder(&self, name: &str, parent: Option<FolderId>) -> Result<FolderId> {
        let mut folders = self.inner.folders.lock().await;
        let mut next = folders.clone();
        let id = next.create_folder(name, parent)?;
        self.inner.store.save_folders(&next).await?;
        *folders = next;

        info!(folder_id = %id, "Folder created");
        self.emit(LibraryEvent::FolderChanged {
            folder_id: id.to_string(),
        });
        Ok(id)
    }

    pub async fn rename_folder(&self, id: FolderId, name: &str) -> Result<()> {
        self.mutate_folders(id, |tree| tree.rename_folder(id, name))
            .await
    }

    /// Fails with [`core_library::LibraryError::Cycle`] when `new_parent` is
    /// `id` or one of its descendants.
    pub async fn move_folder(&self, id: FolderId, new_parent: Option<FolderId>) -> Result<()> {
        self.mutate_folders(id, |tree| tree.move_folder(id, new_parent))
            .await
    }

    pub async fn delete_folder(&self, id: FolderId) -> Result<()> {
        self.mutate_folders(id, |tree| tree.delete_folder(id).map(|_| ()))
            .await
    }

    pub async fn assign_playlist(&self, playlist: PlaylistId, folder: FolderId) -> Result<bool> {
        self.mutate_folders(folder, |tree| tree.assign_playlist(playlist, folder))
            .await
    }

    pub async fn remove_playlist(&self, playlist: &PlaylistId, folder: FolderId) -> Result<bool> {
        self.mutate_folders(folder, |tree| tree.remove_playlist(playlist, folder))
            .await
    }

    /// Tree view with stale flags resolved against the committed index.
    pub async fn list_tree(&self) -> FolderTreeView {
        let folders = self.inner.folders.lock().await;
        let index = self.inner.index.lock().await;
        folders.list_tree(&index)
    }

    pub async fn folder_tree(&self) -> FolderTree {
        self.inner.folders.lock().await.clone()
    }
}
