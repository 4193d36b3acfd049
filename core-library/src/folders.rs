//! # Virtual Folders
//!
//! User-defined grouping of playlists, stored next to the snapshots but never
//! touched by sync.
//!
//! ## Invariants
//!
//! - Every folder is either a root or listed in exactly one parent's `children`.
//! - No folder is its own ancestor. [`FolderTree::move_folder`] rejects such a
//!   move with [`LibraryError::Cycle`] and leaves the tree unchanged.
//! - A playlist may sit in any number of folders. Playlists in none are shown in
//!   the implicit root bucket by [`FolderTree::list_tree`].
//! - Playlist references are never pruned when the playlist vanishes remotely;
//!   they are listed as stale instead.

use crate::error::{LibraryError, Result};
use crate::models::{FolderId, LibraryIndex, PlaylistId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub parent: Option<FolderId>,
    pub children: Vec<FolderId>,
    pub playlists: Vec<PlaylistId>,
}

/// Folder hierarchy keyed by folder id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderTree {
    folders: BTreeMap<FolderId, Folder>,
    roots: Vec<FolderId>,
}

/// Rendering view of one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub id: FolderId,
    pub name: String,
    pub children: Vec<FolderNode>,
    pub playlists: Vec<PlaylistRef>,
}

/// A playlist as shown inside the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistRef {
    pub id: PlaylistId,
    /// Last known name, if the index still has one.
    pub name: Option<String>,
    /// Not present in the index, or tombstoned.
    pub stale: bool,
}

/// Whole-tree rendering view returned by [`FolderTree::list_tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderTreeView {
    pub roots: Vec<FolderNode>,
    /// Live playlists not placed in any folder, by name.
    pub unfiled: Vec<PlaylistRef>,
}

fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::InvalidInput {
            field: "name".to_string(),
            message: "Folder name cannot be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

impl FolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn get(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.get(id)
    }

    pub fn roots(&self) -> &[FolderId] {
        &self.roots
    }

    fn require(&self, id: &FolderId) -> Result<&Folder> {
        self.folders
            .get(id)
            .ok_or_else(|| LibraryError::not_found("folder", id))
    }

    fn require_mut(&mut self, id: &FolderId) -> Result<&mut Folder> {
        self.folders
            .get_mut(id)
            .ok_or_else(|| LibraryError::not_found("folder", id))
    }

    /// Sibling list that holds `parent`'s children (the root list for `None`).
    fn siblings_mut(&mut self, parent: Option<FolderId>) -> Result<&mut Vec<FolderId>> {
        match parent {
            None => Ok(&mut self.roots),
            Some(parent) => Ok(&mut self.require_mut(&parent)?.children),
        }
    }

    /// Creates a folder under `parent`, or at the root.
    pub fn create_folder(&mut self, name: &str, parent: Option<FolderId>) -> Result<FolderId> {
        let name = clean_name(name)?;
        if let Some(parent) = parent {
            self.require(&parent)?;
        }

        let id = FolderId::new();
        self.siblings_mut(parent)?.push(id);
        self.folders.insert(
            id,
            Folder {
                id,
                name,
                parent,
                children: Vec::new(),
                playlists: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn rename_folder(&mut self, id: FolderId, name: &str) -> Result<()> {
        let name = clean_name(name)?;
        self.require_mut(&id)?.name = name;
        Ok(())
    }

    /// True if `candidate` is `ancestor` or lies below it.
    fn is_within(&self, candidate: FolderId, ancestor: FolderId) -> bool {
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.folders.get(&current).and_then(|f| f.parent);
        }
        false
    }

    /// Re-parents `id` under `new_parent` (or the root).
    ///
    /// Fails with [`LibraryError::Cycle`] when `new_parent` is `id` itself or one
    /// of its descendants.
    pub fn move_folder(&mut self, id: FolderId, new_parent: Option<FolderId>) -> Result<()> {
        let old_parent = self.require(&id)?.parent;
        if let Some(parent) = new_parent {
            self.require(&parent)?;
            if self.is_within(parent, id) {
                return Err(LibraryError::Cycle {
                    folder_id: id.to_string(),
                    parent_id: parent.to_string(),
                });
            }
        }

        if old_parent == new_parent {
            return Ok(());
        }

        self.siblings_mut(old_parent)?.retain(|child| *child != id);
        self.siblings_mut(new_parent)?.push(id);
        self.require_mut(&id)?.parent = new_parent;
        Ok(())
    }

    /// Removes a folder. Its children and playlists move up to its parent; for
    /// a root folder the children become roots and the playlists fall back to
    /// the root bucket.
    pub fn delete_folder(&mut self, id: FolderId) -> Result<Folder> {
        if let Some(parent) = self.require(&id)?.parent {
            self.require(&parent)?;
        }
        let folder = self
            .folders
            .remove(&id)
            .ok_or_else(|| LibraryError::not_found("folder", id))?;

        for child in &folder.children {
            if let Some(child) = self.folders.get_mut(child) {
                child.parent = folder.parent;
            }
        }

        let siblings = self.siblings_mut(folder.parent)?;
        let slot = siblings.iter().position(|f| *f == id).unwrap_or(siblings.len());
        siblings.splice(slot..(slot + 1).min(siblings.len()), folder.children.iter().copied());

        if let Some(parent) = folder.parent {
            let parent = self.require_mut(&parent)?;
            for playlist in &folder.playlists {
                if !parent.playlists.contains(playlist) {
                    parent.playlists.push(playlist.clone());
                }
            }
        }

        Ok(folder)
    }

    /// Adds `playlist` to `folder`. Returns `false` if it was already there.
    pub fn assign_playlist(&mut self, playlist: PlaylistId, folder: FolderId) -> Result<bool> {
        let folder = self.require_mut(&folder)?;
        if folder.playlists.contains(&playlist) {
            return Ok(false);
        }
        folder.playlists.push(playlist);
        Ok(true)
    }

    /// Removes `playlist` from `folder`. Returns `false` if it was not there.
    pub fn remove_playlist(&mut self, playlist: &PlaylistId, folder: FolderId) -> Result<bool> {
        let folder = self.require_mut(&folder)?;
        let before = folder.playlists.len();
        folder.playlists.retain(|p| p != playlist);
        Ok(folder.playlists.len() != before)
    }

    pub fn folders_containing(&self, playlist: &PlaylistId) -> Vec<FolderId> {
        self.folders
            .values()
            .filter(|f| f.playlists.contains(playlist))
            .map(|f| f.id)
            .collect()
    }

    /// Checks parent links, child lists and acyclicity of a loaded tree.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<(FolderId, Option<FolderId>)> =
            self.roots.iter().rev().map(|id| (*id, None)).collect();

        while let Some((id, parent)) = stack.pop() {
            if !seen.insert(id) {
                return Err(format!("Folder {} is reachable twice", id));
            }
            let folder = self
                .folders
                .get(&id)
                .ok_or_else(|| format!("Folder {} is listed but missing", id))?;
            if folder.parent != parent {
                return Err(format!("Folder {} has an inconsistent parent link", id));
            }
            stack.extend(folder.children.iter().rev().map(|child| (*child, Some(id))));
        }

        if seen.len() != self.folders.len() {
            return Err("Some folders are not reachable from a root".to_string());
        }
        Ok(())
    }

    fn playlist_ref(index: &LibraryIndex, id: &PlaylistId) -> PlaylistRef {
        let entry = index.get(id);
        PlaylistRef {
            id: id.clone(),
            name: entry.map(|e| e.name.clone()),
            stale: !index.is_live(id),
        }
    }

    fn node(&self, id: &FolderId, index: &LibraryIndex) -> Option<FolderNode> {
        let folder = self.folders.get(id)?;
        Some(FolderNode {
            id: folder.id,
            name: folder.name.clone(),
            children: folder
                .children
                .iter()
                .filter_map(|child| self.node(child, index))
                .collect(),
            playlists: folder
                .playlists
                .iter()
                .map(|p| Self::playlist_ref(index, p))
                .collect(),
        })
    }

    /// Snapshot of the tree for rendering, with stale flags resolved against
    /// `index`.
    pub fn list_tree(&self, index: &LibraryIndex) -> FolderTreeView {
        let filed: HashSet<&PlaylistId> = self
            .folders
            .values()
            .flat_map(|f| f.playlists.iter())
            .collect();

        let mut unfiled: Vec<PlaylistRef> = index
            .live_playlists()
            .filter(|(id, _)| !filed.contains(id))
            .map(|(id, _)| Self::playlist_ref(index, id))
            .collect();
        unfiled.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        FolderTreeView {
            roots: self
                .roots
                .iter()
                .filter_map(|id| self.node(id, index))
                .collect(),
            unfiled,
        }
    }
}
