//! # Playlist Diff
//!
//! Position-aware comparison of two ordered track sequences.
//!
//! Duplicates are significant: `[x, a, x]` and `[x, a]` differ by one removal at
//! position 2, not by nothing. A reversed playlist is reported as moved entries,
//! never as removals plus additions.
//!
//! ## Algorithm
//!
//! 1. Strip the common prefix and suffix (the usual case after an append or a
//!    removal touches only a short middle).
//! 2. Find the longest common subsequence of the middles. Small middles use an
//!    exact LCS table; large ones pair occurrences by rank and keep the longest
//!    increasing run, which is exact for permutations and close otherwise.
//! 3. Entries outside the common subsequence that exist on both sides with the
//!    same track id are moves; the rest are removals (old side) or additions
//!    (new side).

use core_library::TrackId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

/// Exact LCS is used while `old.len() * new.len()` stays below this.
const LCS_CELL_LIMIT: usize = 4_000_000;

/// Summary counts for a changed playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub added: u32,
    pub removed: u32,
    pub reordered: u32,
}

impl ChangeCounts {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.reordered == 0
    }
}

/// An entry that kept its track but changed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub track_id: TrackId,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistDiff {
    /// Positions in the new sequence holding tracks that were not there before.
    pub added: Vec<usize>,
    /// Positions in the old sequence whose entries are gone.
    pub removed: Vec<usize>,
    pub moved: Vec<Move>,
    /// Maximal runs of new positions occupied by moved entries.
    pub reordered_ranges: Vec<Range<usize>>,
}

impl PlaylistDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added.len() as u32,
            removed: self.removed.len() as u32,
            reordered: self.moved.len() as u32,
        }
    }
}

/// Compares `old` against `new`.
pub fn diff_sequences(old: &[TrackId], new: &[TrackId]) -> PlaylistDiff {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let common = if old_mid.len().saturating_mul(new_mid.len()) <= LCS_CELL_LIMIT {
        lcs_pairs(old_mid, new_mid)
    } else {
        rank_pairs(old_mid, new_mid)
    };

    let mut old_matched = vec![false; old_mid.len()];
    let mut new_matched = vec![false; new_mid.len()];
    for &(i, j) in &common {
        old_matched[i] = true;
        new_matched[j] = true;
    }

    // unmatched old occurrences per track, in order
    let mut leftovers: HashMap<&TrackId, VecDeque<usize>> = HashMap::new();
    for (i, id) in old_mid.iter().enumerate() {
        if !old_matched[i] {
            leftovers.entry(id).or_default().push_back(i);
        }
    }

    let mut diff = PlaylistDiff::default();
    for (j, id) in new_mid.iter().enumerate() {
        if new_matched[j] {
            continue;
        }
        match leftovers.get_mut(id).and_then(|q| q.pop_front()) {
            Some(i) => {
                old_matched[i] = true;
                diff.moved.push(Move {
                    track_id: id.clone(),
                    from: prefix + i,
                    to: prefix + j,
                });
            }
            None => diff.added.push(prefix + j),
        }
    }

    diff.removed = old_matched
        .iter()
        .enumerate()
        .filter(|(_, matched)| !**matched)
        .map(|(i, _)| prefix + i)
        .collect();

    diff.reordered_ranges = merge_ranges(diff.moved.iter().map(|m| m.to));
    diff
}

/// Index pairs of an exact longest common subsequence.
fn lcs_pairs(a: &[TrackId], b: &[TrackId]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return Vec::new();
    }

    // table[i][j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0] as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// Approximate common subsequence for large inputs: the k-th occurrence of a
/// track in `b` is paired with its k-th occurrence in `a`, and the longest run
/// of pairs increasing on both sides is kept.
fn rank_pairs(a: &[TrackId], b: &[TrackId]) -> Vec<(usize, usize)> {
    let mut positions: HashMap<&TrackId, VecDeque<usize>> = HashMap::new();
    for (i, id) in a.iter().enumerate() {
        positions.entry(id).or_default().push_back(i);
    }

    let candidates: Vec<(usize, usize)> = b
        .iter()
        .enumerate()
        .filter_map(|(j, id)| {
            positions
                .get_mut(id)
                .and_then(|q| q.pop_front())
                .map(|i| (i, j))
        })
        .collect();

    longest_increasing(&candidates)
}

/// Longest subsequence of `pairs` (already increasing in `.1`) that is also
/// increasing in `.0`. Patience sorting, O(n log n).
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];

    for (k, &(i, _)) in pairs.iter().enumerate() {
        let slot = tails.partition_point(|&t| pairs[t].0 < i);
        if slot > 0 {
            prev[k] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(k);
        } else {
            tails[slot] = k;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        out.push(pairs[k]);
        cursor = prev[k];
    }
    out.reverse();
    out
}

fn merge_ranges(positions: impl Iterator<Item = usize>) -> Vec<Range<usize>> {
    let mut sorted: Vec<usize> = positions.collect();
    sorted.sort_unstable();

    let mut ranges: Vec<Range<usize>> = Vec::new();
    for p in sorted {
        match ranges.last_mut() {
            Some(last) if last.end == p => last.end = p + 1,
            _ => ranges.push(p..p + 1),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(s: &str) -> Vec<TrackId> {
        s.split_whitespace().map(TrackId::new).collect()
    }

    #[test]
    fn test_identical_sequences_have_no_changes() {
        let seq = ids("a b c a");
        let diff = diff_sequences(&seq, &seq);
        assert!(diff.is_empty());
        assert!(diff.counts().is_empty());
    }

    #[test]
    fn test_append_and_prepend() {
        let diff = diff_sequences(&ids("a b"), &ids("z a b c"));
        assert_eq!(diff.added, vec![0, 3]);
        assert!(diff.removed.is_empty());
        assert!(diff.moved.is_empty());
    }

    #[test]
    fn test_reversal_is_a_reorder() {
        let diff = diff_sequences(&ids("a b c d"), &ids("d c b a"));
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.counts().reordered, 3);
        assert!(!diff.reordered_ranges.is_empty());
    }

    #[test]
    fn test_reversal_with_duplicate_track() {
        let diff = diff_sequences(&ids("x a b x"), &ids("x b a x"));
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.moved.len(), 1);
        let m = &diff.moved[0];
        assert_ne!(m.from, m.to);
    }

    #[test]
    fn test_removing_later_duplicate_keeps_first() {
        let diff = diff_sequences(&ids("x a b c d x"), &ids("x a b c d"));
        assert_eq!(diff.removed, vec![5]);
        assert!(diff.added.is_empty());
        assert!(diff.moved.is_empty());
    }

    #[test]
    fn test_removing_earlier_duplicate_keeps_later() {
        let diff = diff_sequences(&ids("x a x"), &ids("a x"));
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.added.is_empty());
        assert!(diff.moved.is_empty());
    }

    #[test]
    fn test_replace_in_middle() {
        let diff = diff_sequences(&ids("a b c"), &ids("a z c"));
        assert_eq!(diff.removed, vec![1]);
        assert_eq!(diff.added, vec![1]);
        assert_eq!(
            diff.counts(),
            ChangeCounts {
                added: 1,
                removed: 1,
                reordered: 0
            }
        );
    }

    #[test]
    fn test_move_single_track_to_front() {
        let diff = diff_sequences(&ids("a b c d e"), &ids("e a b c d"));
        assert_eq!(
            diff.moved,
            vec![Move {
                track_id: TrackId::new("e"),
                from: 4,
                to: 0
            }]
        );
        assert_eq!(diff.reordered_ranges, vec![0..1]);
    }

    #[test]
    fn test_empty_sides() {
        let diff = diff_sequences(&[], &ids("a a"));
        assert_eq!(diff.added, vec![0, 1]);

        let diff = diff_sequences(&ids("a b"), &[]);
        assert_eq!(diff.removed, vec![0, 1]);
    }

    #[test]
    fn test_rank_pairs_matches_lcs_on_permutations() {
        let old = ids("a b c d e f");
        let new = ids("b a d c f e");
        assert_eq!(lcs_pairs(&old, &new).len(), rank_pairs(&old, &new).len());
    }

    #[test]
    fn test_merge_ranges() {
        let ranges = merge_ranges([5, 1, 2, 3, 7, 6].into_iter());
        assert_eq!(ranges, vec![1..4, 5..8]);
    }
}
