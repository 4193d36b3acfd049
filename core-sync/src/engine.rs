//! # Sync Engine
//!
//! Brings the local mirror up to date with the remote library.
//!
//! ## Workflow
//!
//! 1. Fetch the top-level listing. This is the only sync-fatal step.
//! 2. Plan: drop duplicate and filtered playlists, then decide per playlist
//!    whether its tracks must be fetched (new, tombstoned, `Full` mode, or a
//!    revision marker that differs or is missing).
//! 3. Run the fetches on a bounded worker pool. Each worker pages through the
//!    track listing, diffs it against the stored snapshot and persists the
//!    candidate as a full replacement.
//! 4. A single coordinating loop applies every worker result to the
//!    [`LibraryIndex`] and writes the index, one playlist at a time.
//! 5. Tombstone playlists missing from the listing, record the full backup
//!    marker, and append to the sync log.
//!
//! ## Cancellation
//!
//! Workers check the token before starting and between pages. A playlist either
//! completes its apply-and-persist step or is reported
//! [`PlaylistOutcome::Cancelled`]; nothing is half-applied.

use crate::diff::{diff_sequences, ChangeCounts};
use crate::error::{FetchError, Result, SyncError};
use crate::pager::{Page, Pager, DEFAULT_MAX_PAGES};
use crate::report::{PlaylistOutcome, PlaylistReport, SyncMode, SyncReport};
use crate::retry::RetryPolicy;
use bridge_traits::{Clock, RemoteEntry, RemotePlaylist, RemoteSource, RemoteTrack};
use chrono::{DateTime, Utc};
use core_library::models::liked_songs_revision;
use core_library::{
    IndexEntry, LibraryIndex, Owner, PlaylistId, PlaylistSnapshot, SnapshotStore, Track, TrackId,
};
use core_runtime::config::{MirrorConfig, PlaylistFilters};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reason reported for a selected playlist missing from the listing.
pub const NOT_IN_LISTING: &str = "not in remote listing";

/// Reason reported for a selected playlist excluded by the filters.
pub const EXCLUDED_BY_FILTERS: &str = "excluded by playlist filters";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Playlists fetched concurrently.
    pub max_concurrent_fetches: usize,
    pub filters: PlaylistFilters,
    pub retry: RetryPolicy,
    /// Archived index copies kept after a full backup.
    pub history_retention: usize,
    pub sync_log_retention: usize,
    pub max_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            filters: PlaylistFilters::default(),
            retry: RetryPolicy::default(),
            history_retention: 10,
            sync_log_retention: 100,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl From<&MirrorConfig> for SyncConfig {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            filters: config.filters,
            retry: RetryPolicy::from_settings(&config.retry, config.request_timeout()),
            history_retention: config.history_retention,
            sync_log_retention: config.sync_log_retention,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// What the plan decided for one playlist.
enum Action {
    Skip,
    Fetch(Job),
    Reject(String),
}

struct Planned {
    id: PlaylistId,
    name: String,
    action: Action,
}

struct Job {
    slot: usize,
    kind: JobKind,
    /// Ignore revision markers and rewrite even identical content.
    force: bool,
    /// The index already knows this playlist.
    known: bool,
}

enum JobKind {
    Playlist(RemotePlaylist),
    /// Carries the stored `count:<n>` revision for the cheap change check.
    LikedSongs { stored_revision: Option<String> },
}

/// Result of one worker.
enum Work {
    /// Nothing fetched or nothing to persist.
    Unchanged,
    Persisted {
        entry: IndexEntry,
        outcome: PlaylistOutcome,
    },
    Tombstone {
        entry: Option<IndexEntry>,
    },
    Failed(String),
    Cancelled,
}

/// Earliest sighting of every track already in the mirror.
type FirstSeen = HashMap<TrackId, DateTime<Utc>>;

struct Done {
    slot: usize,
    id: PlaylistId,
    work: Work,
    warnings: Vec<String>,
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            store,
            clock,
            events: None,
            config,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    fn emit_library(&self, event: LibraryEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Library(event)).ok();
        }
    }

    fn throttled(&self, playlist_id: &str, wait: Duration, attempt: u32) {
        self.emit(SyncEvent::Throttled {
            playlist_id: playlist_id.to_string(),
            wait_ms: wait.as_millis() as u64,
            attempt,
        });
    }

    /// Synchronizes the whole library in `Full` or `Incremental` mode.
    ///
    /// `index` is updated in place and persisted after every applied playlist.
    /// Only a failure of the top-level listing (or of the store itself) is
    /// returned as an error; everything else is in the report.
    #[instrument(skip_all, fields(mode = %mode))]
    pub async fn sync_library(
        &self,
        index: &mut LibraryIndex,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        if mode == SyncMode::Selected {
            return Err(SyncError::InvalidMode(
                "selected mode requires playlist ids, use sync_playlists".to_string(),
            ));
        }
        self.run(index, mode, None, cancel).await
    }

    /// Refreshes only `ids`. The liked-songs sentinel may be included. Nothing
    /// is tombstoned and the full backup marker is left alone.
    #[instrument(skip_all, fields(selected = ids.len()))]
    pub async fn sync_playlists(
        &self,
        index: &mut LibraryIndex,
        ids: &[PlaylistId],
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        self.run(index, SyncMode::Selected, Some(ids), cancel).await
    }

    async fn run(
        &self,
        index: &mut LibraryIndex,
        mode: SyncMode,
        selected: Option<&[PlaylistId]>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started_at = self.clock.now();
        let mut report = SyncReport::new(mode, started_at);
        let job_id = report.job_id.clone();

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(job_id = %job_id, "Phase 1: fetching playlist listing");
        let listing = match self
            .config
            .retry
            .run(
                "list_playlists",
                cancel,
                |wait, attempt| self.throttled("listing", wait, attempt),
                || self.remote.list_playlists(),
            )
            .await
        {
            Ok(listing) => listing,
            Err(FetchError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Playlist listing failed");
                self.emit(SyncEvent::Failed {
                    job_id: job_id.clone(),
                    message: err.to_string(),
                });
                return Err(SyncError::Listing(err));
            }
        };

        let (accepted, seen) = self.filter_listing(listing);
        let mut plan = match selected {
            None => self.plan_library(index, mode, accepted),
            Some(ids) => plan_selected(index, ids, accepted, &seen),
        };

        let to_fetch = plan
            .iter()
            .filter(|p| matches!(p.action, Action::Fetch(_)))
            .count();
        info!(
            job_id = %job_id,
            playlists = plan.len(),
            to_fetch,
            "Phase 2: plan ready"
        );
        self.emit(SyncEvent::Started {
            job_id: job_id.clone(),
            mode: mode.to_string(),
            playlists: seen.len() as u32,
            to_fetch: to_fetch as u32,
        });

        // Phase 3: workers fetch and persist, a single applier records results.
        let mut outcomes: Vec<Option<PlaylistOutcome>> = plan
            .iter()
            .map(|p| match &p.action {
                Action::Skip => Some(PlaylistOutcome::Unchanged),
                Action::Reject(reason) => Some(PlaylistOutcome::Failed(reason.clone())),
                Action::Fetch(_) => None,
            })
            .collect();

        let jobs: Vec<(PlaylistId, Job)> = plan
            .iter_mut()
            .filter_map(|p| match std::mem::replace(&mut p.action, Action::Skip) {
                Action::Fetch(job) => Some((p.id.clone(), job)),
                _ => None,
            })
            .collect();

        let total = jobs.len() as u32;
        let mut completed = 0u32;
        let now = self.clock.now();
        let first_seen = if jobs.is_empty() {
            FirstSeen::new()
        } else {
            self.first_sightings(index).await
        };

        // Fetches keep running while the applier writes the index; results
        // are handed over through a channel and applied one at a time.
        let (done_tx, done_rx) = mpsc::unbounded_channel::<Done>();
        let fetches = async {
            let mut results = stream::iter(
                jobs.into_iter()
                    .map(|(id, job)| self.work(id, job, now, &first_seen, cancel)),
            )
            .buffer_unordered(self.config.max_concurrent_fetches.max(1));
            while let Some(done) = results.next().await {
                if done_tx.send(done).is_err() {
                    break;
                }
            }
            drop(done_tx);
        };
        let applier = async {
            let mut done_rx = done_rx;
            while let Some(done) = done_rx.recv().await {
                completed += 1;
                report.warnings.extend(done.warnings.iter().cloned());
                let outcome = self.apply(index, &done.id, done.work, now).await?;
                debug!(playlist_id = %done.id, outcome = outcome.label(), "Playlist applied");
                self.emit(SyncEvent::Progress {
                    job_id: job_id.clone(),
                    completed,
                    total,
                    playlist_id: done.id.to_string(),
                });
                outcomes[done.slot] = Some(outcome);
            }
            Ok::<(), SyncError>(())
        };
        let ((), applied) = tokio::join!(fetches, applier);
        applied?;

        for (planned, outcome) in plan.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or(PlaylistOutcome::Cancelled);
            if planned.id.is_liked_songs() {
                report.liked_songs = Some(outcome);
            } else {
                report.playlists.push(PlaylistReport {
                    playlist_id: planned.id.clone(),
                    name: planned.name.clone(),
                    outcome,
                });
            }
        }

        // Phase 4: tombstones, only when the listing covered the whole library.
        if selected.is_none() {
            self.tombstone_missing(index, &seen, now, cancel, &mut report)
                .await?;
        }

        let cancelled = cancel.is_cancelled();
        if mode == SyncMode::Full && !cancelled && !report.has_failures() {
            index.mark_full_backup(now);
            self.store.write_index(index).await?;
            self.store
                .archive_index(index, now, self.config.history_retention)
                .await?;
            report.full_backup_recorded = true;
            info!(job_id = %job_id, "Full backup recorded");
        }

        report.finished_at = self.clock.now();
        if let Err(err) = self
            .store
            .append_sync_log(report.to_log_entry(), self.config.sync_log_retention)
            .await
        {
            warn!(error = %err, "Failed to append sync log");
            report.warnings.push(format!("sync log not written: {}", err));
        }

        let summary = report.summary();
        if cancelled {
            info!(job_id = %job_id, completed, "Sync cancelled");
            self.emit(SyncEvent::Cancelled {
                job_id: job_id.clone(),
                completed,
            });
        } else {
            info!(
                job_id = %job_id,
                unchanged = summary.unchanged,
                updated = summary.updated,
                new = summary.new,
                tombstoned = summary.tombstoned,
                failed = summary.failed,
                "Sync completed"
            );
            self.emit(SyncEvent::Completed {
                job_id,
                counts: summary.into(),
                duration_ms: report.duration_ms(),
            });
        }

        Ok(report)
    }

    /// Applies the filters and drops duplicate ids. Returns the accepted
    /// playlists in listing order and every id the listing mentioned.
    fn filter_listing(&self, listing: Vec<RemotePlaylist>) -> (Vec<RemotePlaylist>, HashSet<PlaylistId>) {
        let filters = self.config.filters;
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for playlist in listing {
            let id = PlaylistId::new(playlist.id.clone());
            if id.is_liked_songs() || id.as_str().is_empty() {
                warn!(playlist_id = %id, "Ignoring playlist with reserved id");
                continue;
            }
            if !seen.insert(id.clone()) {
                debug!(playlist_id = %id, "Ignoring duplicate listing entry");
                continue;
            }
            if playlist.service_owned && !filters.include_service_playlists {
                debug!(playlist_id = %id, "Skipping service playlist");
                continue;
            }
            if playlist.collaborative && !filters.include_collaborative {
                debug!(playlist_id = %id, "Skipping collaborative playlist");
                continue;
            }
            accepted.push(playlist);
        }
        (accepted, seen)
    }

    fn plan_library(
        &self,
        index: &LibraryIndex,
        mode: SyncMode,
        accepted: Vec<RemotePlaylist>,
    ) -> Vec<Planned> {
        let force = mode == SyncMode::Full;
        let mut plan = Vec::with_capacity(accepted.len() + 1);

        for remote in accepted {
            let id = PlaylistId::new(remote.id.clone());
            let stored = index.playlists.get(&id);
            let fetch = match stored {
                None => true,
                Some(entry) if entry.is_tombstoned() => true,
                Some(entry) => {
                    force
                        || remote.revision.is_none()
                        || entry.revision.is_none()
                        || remote.revision != entry.revision
                }
            };

            let name = remote.name.clone();
            let action = if fetch {
                Action::Fetch(Job {
                    slot: plan.len(),
                    force,
                    known: stored.is_some(),
                    kind: JobKind::Playlist(remote),
                })
            } else {
                Action::Skip
            };
            plan.push(Planned { id, name, action });
        }

        plan.push(Planned {
            id: PlaylistId::liked_songs(),
            name: core_library::models::LIKED_SONGS_NAME.to_string(),
            action: Action::Fetch(Job {
                slot: plan.len(),
                force,
                known: index.liked_songs.is_some(),
                kind: JobKind::LikedSongs {
                    stored_revision: index.liked_songs.as_ref().and_then(|e| e.revision.clone()),
                },
            }),
        });
        plan
    }

    /// Collects `first_seen_at` for every track in the stored snapshots,
    /// tombstoned ones included. Unreadable snapshots are skipped here; the
    /// workers report them.
    async fn first_sightings(&self, index: &LibraryIndex) -> FirstSeen {
        let ids = index
            .playlists
            .keys()
            .cloned()
            .chain(index.liked_songs.is_some().then(PlaylistId::liked_songs));

        let mut first_seen = FirstSeen::new();
        for id in ids {
            let snapshot = match self.store.read_playlist(&id).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    debug!(playlist_id = %id, error = %err, "Skipping snapshot for first sightings");
                    continue;
                }
            };
            for (track_id, track) in snapshot.tracks {
                first_seen
                    .entry(track_id)
                    .and_modify(|at| *at = (*at).min(track.first_seen_at))
                    .or_insert(track.first_seen_at);
            }
        }
        debug!(tracks = first_seen.len(), "First sightings loaded");
        first_seen
    }

    async fn work(
        &self,
        id: PlaylistId,
        job: Job,
        now: DateTime<Utc>,
        first_seen: &FirstSeen,
        cancel: &CancellationToken,
    ) -> Done {
        let mut warnings = Vec::new();
        let work = if cancel.is_cancelled() {
            Work::Cancelled
        } else {
            match &job.kind {
                JobKind::Playlist(remote) => {
                    self.work_playlist(&id, remote, &job, now, first_seen, cancel, &mut warnings)
                        .await
                }
                JobKind::LikedSongs { stored_revision } => {
                    self.work_liked_songs(
                        stored_revision.as_deref(),
                        &job,
                        now,
                        first_seen,
                        cancel,
                        &mut warnings,
                    )
                    .await
                }
            }
        };
        Done {
            slot: job.slot,
            id,
            work,
            warnings,
        }
    }

    /// Reads the stored snapshot, treating a corrupt one as absent.
    async fn read_stored(
        &self,
        id: &PlaylistId,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<Option<PlaylistSnapshot>, String> {
        match self.store.read_playlist(id).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) if err.is_corrupt() => {
                warn!(playlist_id = %id, error = %err, "Stored snapshot is corrupt, treating as absent");
                self.emit_library(LibraryEvent::SnapshotCorrupt {
                    playlist_id: id.to_string(),
                    message: err.to_string(),
                });
                warnings.push(format!("{}: {}", id, err));
                Ok(None)
            }
            Err(err) => Err(format!("failed to read stored snapshot: {}", err)),
        }
    }

    #[instrument(skip_all, fields(playlist_id = %id))]
    async fn work_playlist(
        &self,
        id: &PlaylistId,
        remote: &RemotePlaylist,
        job: &Job,
        now: DateTime<Utc>,
        first_seen: &FirstSeen,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Work {
        let stored = match self.read_stored(id, warnings).await {
            Ok(stored) => stored,
            Err(reason) => return Work::Failed(reason),
        };

        let label = id.as_str();
        let mut pager = Pager::new(self.config.max_pages);
        let fetched = pager
            .drain(label, cancel, |cursor| async move {
                self.config
                    .retry
                    .run(
                        label,
                        cancel,
                        |wait, attempt| self.throttled(label, wait, attempt),
                        || self.remote.list_playlist_tracks(label, cursor.clone()),
                    )
                    .await
                    .map(|page| Page {
                        items: page.entries,
                        next_cursor: page.next_cursor,
                    })
            })
            .await;

        let entries = match fetched {
            Ok(entries) => entries,
            Err(FetchError::Cancelled) => return Work::Cancelled,
            Err(err) if err.is_not_found() => {
                info!(playlist_id = %id, "Playlist vanished during sync, tombstoning");
                return self.tombstone_snapshot(stored, now).await;
            }
            Err(err) => {
                warn!(playlist_id = %id, error = %err, "Playlist fetch failed");
                return Work::Failed(err.to_string());
            }
        };

        let mut candidate = PlaylistSnapshot::new(id.clone(), remote.name.clone(), now);
        candidate.description = remote.description.clone().filter(|d| !d.is_empty());
        candidate.owner = Owner {
            id: remote.owner.id.clone(),
            display_name: remote.owner.display_name.clone(),
        };
        candidate.public = remote.public;
        candidate.collaborative = remote.collaborative;
        candidate.revision = remote.revision.clone();
        fill_entries(&mut candidate, entries, stored.as_ref(), first_seen, now);

        self.persist(candidate, stored, job).await
    }

    #[instrument(skip_all, fields(playlist_id = "liked_songs"))]
    async fn work_liked_songs(
        &self,
        stored_revision: Option<&str>,
        job: &Job,
        now: DateTime<Utc>,
        first_seen: &FirstSeen,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Work {
        let label = "liked_songs";
        let first = match self
            .config
            .retry
            .run(
                label,
                cancel,
                |wait, attempt| self.throttled(label, wait, attempt),
                || self.remote.list_liked_songs(None),
            )
            .await
        {
            Ok(page) => page,
            Err(FetchError::Cancelled) => return Work::Cancelled,
            Err(err) => {
                warn!(error = %err, "Liked songs fetch failed");
                return Work::Failed(err.to_string());
            }
        };

        // Count heuristic: same total as stored means unchanged. A swap that
        // keeps the total is not detected.
        if let (false, Some(total), Some(stored)) = (job.force, first.total, stored_revision) {
            if liked_songs_revision(total) == stored {
                debug!(total, "Liked songs count unchanged, skipping");
                return Work::Unchanged;
            }
        }

        let stored = match self.read_stored(&PlaylistId::liked_songs(), warnings).await {
            Ok(stored) => stored,
            Err(reason) => return Work::Failed(reason),
        };

        let mut pager = Pager::new(self.config.max_pages);
        let mut entries = first.entries;
        if let Err(err) = pager.advance(first.next_cursor) {
            return Work::Failed(err.to_string());
        }
        let rest = pager
            .drain(label, cancel, |cursor| async move {
                self.config
                    .retry
                    .run(
                        label,
                        cancel,
                        |wait, attempt| self.throttled(label, wait, attempt),
                        || self.remote.list_liked_songs(cursor.clone()),
                    )
                    .await
                    .map(|page| Page {
                        items: page.entries,
                        next_cursor: page.next_cursor,
                    })
            })
            .await;
        match rest {
            Ok(more) => entries.extend(more),
            Err(FetchError::Cancelled) => return Work::Cancelled,
            Err(err) => {
                warn!(error = %err, "Liked songs fetch failed");
                return Work::Failed(err.to_string());
            }
        }

        let total = first.total.unwrap_or(entries.len() as u32);
        let mut candidate = PlaylistSnapshot::liked_songs(total, now);
        fill_entries(&mut candidate, entries, stored.as_ref(), first_seen, now);

        self.persist(candidate, stored, job).await
    }

    /// Diffs `candidate` against `stored` and writes what needs writing.
    async fn persist(
        &self,
        candidate: PlaylistSnapshot,
        stored: Option<PlaylistSnapshot>,
        job: &Job,
    ) -> Work {
        let (to_write, outcome) = match stored {
            None if job.known => {
                let counts = ChangeCounts {
                    added: candidate.track_count(),
                    ..Default::default()
                };
                (candidate, PlaylistOutcome::Updated(counts))
            }
            None => {
                let tracks = candidate.track_count();
                (candidate, PlaylistOutcome::New { tracks })
            }
            Some(stored) => {
                let diff = diff_sequences(&stored.track_sequence(), &candidate.track_sequence());
                let same = PlaylistSnapshot {
                    last_synced_at: stored.last_synced_at,
                    ..candidate.clone()
                } == stored;

                if same && !job.force {
                    // identical bytes, keeps repeated incremental syncs idempotent
                    (stored, PlaylistOutcome::Unchanged)
                } else if same {
                    (candidate, PlaylistOutcome::Unchanged)
                } else {
                    if stored.is_tombstoned() {
                        info!(playlist_id = %candidate.id, "Tombstoned playlist reappeared");
                    }
                    (candidate, PlaylistOutcome::Updated(diff.counts()))
                }
            }
        };

        match self.store.write_playlist(&to_write).await {
            Ok(entry) => Work::Persisted { entry, outcome },
            Err(err) => {
                warn!(playlist_id = %to_write.id, error = %err, "Failed to persist snapshot");
                Work::Failed(format!("failed to persist snapshot: {}", err))
            }
        }
    }

    async fn tombstone_snapshot(&self, stored: Option<PlaylistSnapshot>, now: DateTime<Utc>) -> Work {
        match stored {
            Some(mut snapshot) => {
                if snapshot.removed_at.is_none() {
                    snapshot.removed_at = Some(now);
                }
                match self.store.write_playlist(&snapshot).await {
                    Ok(entry) => Work::Tombstone { entry: Some(entry) },
                    Err(err) => Work::Failed(format!("failed to persist tombstone: {}", err)),
                }
            }
            None => Work::Tombstone { entry: None },
        }
    }

    /// Single-writer step: records a worker result in the index and persists it.
    async fn apply(
        &self,
        index: &mut LibraryIndex,
        id: &PlaylistId,
        work: Work,
        now: DateTime<Utc>,
    ) -> Result<PlaylistOutcome> {
        let outcome = match work {
            Work::Unchanged => PlaylistOutcome::Unchanged,
            Work::Persisted { entry, outcome } => {
                self.commit(index, id, entry).await?;
                outcome
            }
            Work::Tombstone { entry } => {
                let entry = entry.or_else(|| {
                    index.get(id).cloned().map(|mut e| {
                        e.removed_at.get_or_insert(now);
                        e
                    })
                });
                if let Some(entry) = entry {
                    self.commit(index, id, entry).await?;
                }
                PlaylistOutcome::Tombstoned
            }
            Work::Failed(reason) => PlaylistOutcome::Failed(reason),
            Work::Cancelled => PlaylistOutcome::Cancelled,
        };
        Ok(outcome)
    }

    async fn commit(&self, index: &mut LibraryIndex, id: &PlaylistId, entry: IndexEntry) -> Result<()> {
        if index.get(id) == Some(&entry) {
            return Ok(());
        }
        index.record(id.clone(), entry);
        self.store.write_index(index).await?;
        Ok(())
    }

    /// Marks live playlists absent from the listing as removed.
    async fn tombstone_missing(
        &self,
        index: &mut LibraryIndex,
        seen: &HashSet<PlaylistId>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let missing: Vec<(PlaylistId, String)> = index
            .live_playlists()
            .filter(|(id, _)| !seen.contains(*id))
            .map(|(id, e)| (id.clone(), e.name.clone()))
            .collect();

        for (id, name) in missing {
            let outcome = if cancel.is_cancelled() {
                PlaylistOutcome::Cancelled
            } else {
                info!(playlist_id = %id, "Playlist removed remotely, tombstoning");
                let mut warnings = Vec::new();
                let work = match self.read_stored(&id, &mut warnings).await {
                    Ok(stored) => self.tombstone_snapshot(stored, now).await,
                    Err(reason) => Work::Failed(reason),
                };
                report.warnings.extend(warnings);
                self.apply(index, &id, work, now).await?
            };
            report.playlists.push(PlaylistReport {
                playlist_id: id,
                name,
                outcome,
            });
        }
        Ok(())
    }
}

fn plan_selected(
    index: &LibraryIndex,
    ids: &[PlaylistId],
    accepted: Vec<RemotePlaylist>,
    seen: &HashSet<PlaylistId>,
) -> Vec<Planned> {
    let mut by_id: HashMap<PlaylistId, RemotePlaylist> = accepted
        .into_iter()
        .map(|p| (PlaylistId::new(p.id.clone()), p))
        .collect();
    let mut requested = HashSet::new();
    let mut plan = Vec::new();

    for id in ids {
        if !requested.insert(id.clone()) {
            continue;
        }
        let slot = plan.len();
        let known_name = index.get(id).map(|e| e.name.clone());

        if id.is_liked_songs() {
            plan.push(Planned {
                id: id.clone(),
                name: core_library::models::LIKED_SONGS_NAME.to_string(),
                action: Action::Fetch(Job {
                    slot,
                    force: true,
                    known: index.liked_songs.is_some(),
                    kind: JobKind::LikedSongs {
                        stored_revision: None,
                    },
                }),
            });
            continue;
        }

        let (name, action) = match by_id.remove(id) {
            Some(remote) => (
                known_name.unwrap_or_else(|| remote.name.clone()),
                Action::Fetch(Job {
                    slot,
                    force: true,
                    known: index.contains(id),
                    kind: JobKind::Playlist(remote),
                }),
            ),
            None if seen.contains(id) => (
                known_name.unwrap_or_default(),
                Action::Reject(EXCLUDED_BY_FILTERS.to_string()),
            ),
            None => (
                known_name.unwrap_or_default(),
                Action::Reject(NOT_IN_LISTING.to_string()),
            ),
        };
        plan.push(Planned {
            id: id.clone(),
            name,
            action,
        });
    }
    plan
}

/// Stable identifier for a track. Local files without a remote id get one
/// derived from their URI, or from artist and title as a last resort.
fn track_id(track: &RemoteTrack) -> TrackId {
    if !track.id.is_empty() {
        return TrackId::new(track.id.clone());
    }
    match &track.uri {
        Some(uri) if !uri.is_empty() => TrackId::new(format!("local:{}", uri)),
        _ => TrackId::new(format!("local:{}:{}", track.artists.join(","), track.title)),
    }
}

/// Appends `entries` to `candidate` in remote order.
///
/// `first_seen_at` is the earliest sighting across the library (`first_seen`
/// and `stored`), else `now`. Entries without a remote add time reuse the
/// stored time of the same occurrence of that track, else `now`.
fn fill_entries(
    candidate: &mut PlaylistSnapshot,
    entries: Vec<RemoteEntry>,
    stored: Option<&PlaylistSnapshot>,
    first_seen: &FirstSeen,
    now: DateTime<Utc>,
) {
    let mut stored_added: HashMap<&TrackId, VecDeque<DateTime<Utc>>> = HashMap::new();
    if let Some(stored) = stored {
        for entry in &stored.entries {
            stored_added
                .entry(&entry.track_id)
                .or_default()
                .push_back(entry.added_at);
        }
    }

    for remote in entries {
        let id = track_id(&remote.track);
        let first_seen_at = stored
            .and_then(|s| s.track(&id))
            .map(|t| t.first_seen_at)
            .into_iter()
            .chain(first_seen.get(&id).copied())
            .min()
            .unwrap_or(now);
        let previous = stored_added.get_mut(&id).and_then(|q| q.pop_front());
        let added_at = remote.added_at.or(previous).unwrap_or(now);

        let RemoteTrack {
            uri,
            title,
            artists,
            album,
            album_id,
            duration_ms,
            track_number,
            disc_number,
            explicit,
            is_local,
            release_date,
            ..
        } = remote.track;

        let track = Track {
            id,
            uri,
            title,
            artists,
            album,
            album_id,
            duration_ms,
            track_number,
            disc_number,
            explicit,
            is_local,
            release_date,
            first_seen_at,
        };
        candidate.push_entry(track, added_at, remote.added_by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, hour, 0, 0).unwrap()
    }

    fn entry(id: &str) -> RemoteEntry {
        RemoteEntry::new(RemoteTrack::new(id, id.to_uppercase(), vec!["A".into()], "B", 1000))
    }

    #[test]
    fn test_fill_entries_preserves_first_seen_and_added_at() {
        let mut stored = PlaylistSnapshot::new("pl".into(), "P", at(1));
        fill_entries(
            &mut stored,
            vec![entry("x"), entry("y"), entry("x")],
            None,
            &FirstSeen::new(),
            at(1),
        );
        assert!(stored.entries.iter().all(|e| e.added_at == at(1)));

        let mut candidate = PlaylistSnapshot::new("pl".into(), "P", at(5));
        fill_entries(
            &mut candidate,
            vec![entry("x"), entry("z"), entry("x"), entry("x")],
            Some(&stored),
            &FirstSeen::new(),
            at(5),
        );

        assert_eq!(candidate.track(&"x".into()).unwrap().first_seen_at, at(1));
        assert_eq!(candidate.track(&"z".into()).unwrap().first_seen_at, at(5));
        let added: Vec<_> = candidate.entries.iter().map(|e| e.added_at).collect();
        assert_eq!(added, vec![at(1), at(5), at(1), at(5)]);
    }

    #[test]
    fn test_first_seen_comes_from_the_whole_library() {
        let first_seen: FirstSeen = [(TrackId::new("x"), at(2)), (TrackId::new("y"), at(9))]
            .into_iter()
            .collect();

        let mut stored = PlaylistSnapshot::new("pl".into(), "P", at(4));
        fill_entries(&mut stored, vec![entry("y")], None, &FirstSeen::new(), at(4));

        let mut candidate = PlaylistSnapshot::new("pl".into(), "P", at(6));
        fill_entries(
            &mut candidate,
            vec![entry("x"), entry("y"), entry("z")],
            Some(&stored),
            &first_seen,
            at(6),
        );

        assert_eq!(candidate.track(&"x".into()).unwrap().first_seen_at, at(2));
        assert_eq!(candidate.track(&"y".into()).unwrap().first_seen_at, at(4));
        assert_eq!(candidate.track(&"z".into()).unwrap().first_seen_at, at(6));
        // remote add times are untouched by earlier sightings elsewhere
        assert_eq!(candidate.entries[0].added_at, at(6));
    }

    #[test]
    fn test_remote_added_at_wins() {
        let mut remote = entry("x");
        remote.added_at = Some(at(3));
        remote.added_by = Some("friend".into());
        let mut snapshot = PlaylistSnapshot::new("pl".into(), "P", at(5));
        fill_entries(&mut snapshot, vec![remote], None, &FirstSeen::new(), at(5));
        assert_eq!(snapshot.entries[0].added_at, at(3));
        assert_eq!(snapshot.entries[0].added_by.as_deref(), Some("friend"));
    }

    #[test]
    fn test_local_tracks_get_derived_ids() {
        let mut local = RemoteTrack::new("", "Demo", vec!["Me".into()], "", 1);
        local.uri = Some("spotify:local:Me::Demo:1".into());
        assert_eq!(track_id(&local).as_str(), "local:spotify:local:Me::Demo:1");

        local.uri = None;
        assert_eq!(track_id(&local).as_str(), "local:Me:Demo");
    }

    #[test]
    fn test_plan_selected_reports_missing_and_filtered() {
        let index = LibraryIndex::new();
        let accepted = vec![RemotePlaylist::new("a", "A", bridge_traits::RemoteOwner::new("me"))];
        let seen: HashSet<PlaylistId> = ["a", "filtered"].iter().map(|s| PlaylistId::new(*s)).collect();
        let ids: Vec<PlaylistId> = ["a", "a", "filtered", "gone"].iter().map(|s| PlaylistId::new(*s)).collect();

        let plan = plan_selected(&index, &ids, accepted, &seen);
        assert_eq!(plan.len(), 3);
        assert!(matches!(plan[0].action, Action::Fetch(_)));
        assert!(matches!(&plan[1].action, Action::Reject(r) if r == EXCLUDED_BY_FILTERS));
        assert!(matches!(&plan[2].action, Action::Reject(r) if r == NOT_IN_LISTING));
    }
}
