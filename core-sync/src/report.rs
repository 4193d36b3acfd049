//! # Sync Report
//!
//! The report is the only channel through which a sync surfaces problems: every
//! playlist considered by a run appears exactly once with its outcome.

use crate::diff::ChangeCounts;
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use core_library::{PlaylistId, SyncLogEntry};
use core_runtime::events::SyncCounts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a sync decides which playlists to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fetch every playlist regardless of revision markers.
    Full,
    /// Fetch only playlists whose revision marker changed or is unknown.
    Incremental,
    /// Fetch an explicit set of playlists; nothing is tombstoned.
    Selected,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Selected => "selected",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "selected" => Ok(SyncMode::Selected),
            other => Err(SyncError::InvalidMode(other.to_string())),
        }
    }
}

/// Per-playlist result of one sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PlaylistOutcome {
    /// Not fetched (revision unchanged) or fetched with identical content.
    Unchanged,
    /// Fetched and persisted with changes. Counts may all be zero when only
    /// playlist or track metadata changed.
    Updated(ChangeCounts),
    /// Seen for the first time and persisted.
    New { tracks: u32 },
    /// Gone from the remote library; the prior snapshot is kept with a
    /// removal timestamp.
    Tombstoned,
    /// Fetch or persist failed; the prior snapshot is untouched.
    Failed(String),
    /// The sync was cancelled before this playlist started.
    Cancelled,
}

impl PlaylistOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PlaylistOutcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaylistOutcome::Unchanged => "unchanged",
            PlaylistOutcome::Updated(_) => "updated",
            PlaylistOutcome::New { .. } => "new",
            PlaylistOutcome::Tombstoned => "tombstoned",
            PlaylistOutcome::Failed(_) => "failed",
            PlaylistOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistReport {
    pub playlist_id: PlaylistId,
    pub name: String,
    pub outcome: PlaylistOutcome,
}

/// Outcome tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub unchanged: u32,
    pub updated: u32,
    pub new: u32,
    pub tombstoned: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl SyncSummary {
    fn count(&mut self, outcome: &PlaylistOutcome) {
        match outcome {
            PlaylistOutcome::Unchanged => self.unchanged += 1,
            PlaylistOutcome::Updated(_) => self.updated += 1,
            PlaylistOutcome::New { .. } => self.new += 1,
            PlaylistOutcome::Tombstoned => self.tombstoned += 1,
            PlaylistOutcome::Failed(_) => self.failed += 1,
            PlaylistOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.unchanged + self.updated + self.new + self.tombstoned + self.failed + self.cancelled
    }
}

impl From<SyncSummary> for SyncCounts {
    fn from(s: SyncSummary) -> Self {
        SyncCounts {
            unchanged: s.unchanged,
            updated: s.updated,
            new: s.new,
            tombstoned: s.tombstoned,
            failed: s.failed,
            cancelled: s.cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Playlists in listing order, followed by tombstoned ones.
    pub playlists: Vec<PlaylistReport>,
    /// `None` when liked songs were not part of this run.
    pub liked_songs: Option<PlaylistOutcome>,
    /// Whether this run recorded `last_full_backup_at`.
    pub full_backup_recorded: bool,
    /// Non-fatal problems, e.g. corrupt snapshots treated as absent.
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn new(mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            mode,
            started_at,
            finished_at: started_at,
            playlists: Vec::new(),
            liked_songs: None,
            full_backup_recorded: false,
            warnings: Vec::new(),
        }
    }

    pub fn outcome(&self, id: &PlaylistId) -> Option<&PlaylistOutcome> {
        if id.is_liked_songs() {
            return self.liked_songs.as_ref();
        }
        self.playlists
            .iter()
            .find(|p| &p.playlist_id == id)
            .map(|p| &p.outcome)
    }

    /// Tallies over playlists and liked songs.
    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for report in &self.playlists {
            summary.count(&report.outcome);
        }
        if let Some(liked) = &self.liked_songs {
            summary.count(liked);
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.playlists.iter().any(|p| p.outcome.is_failure())
            || self.liked_songs.as_ref().is_some_and(|o| o.is_failure())
    }

    pub fn failures(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .playlists
            .iter()
            .filter_map(|p| match &p.outcome {
                PlaylistOutcome::Failed(reason) => Some(format!("{}: {}", p.playlist_id, reason)),
                _ => None,
            })
            .collect();
        if let Some(PlaylistOutcome::Failed(reason)) = &self.liked_songs {
            out.push(format!("liked songs: {}", reason));
        }
        out
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub fn to_log_entry(&self) -> SyncLogEntry {
        let s = self.summary();
        SyncLogEntry {
            job_id: self.job_id.clone(),
            mode: self.mode.as_str().to_string(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            unchanged: s.unchanged,
            updated: s.updated,
            new: s.new,
            tombstoned: s.tombstoned,
            failed: s.failed,
            cancelled: s.cancelled,
            full_backup_recorded: self.full_backup_recorded,
            failures: self.failures(),
        }
    }
}
