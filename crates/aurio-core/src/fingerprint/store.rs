//! In-memory hash index and time-aligned match search

use super::{Profile, SubFingerprint};
use crate::error::Result;
use crate::matching::{Match, TrackId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Label of matches found by this store
pub const MATCH_SOURCE: &str = "FP-W03";

/// Progress is reported every this many collision keys
const PROGRESS_INTERVAL: usize = 4096;

/// Location of one frame's hashes in a track's hash list
#[derive(Debug, Clone, Copy, Default)]
struct IndexEntry {
    offset: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct TrackStore {
    /// All hashes of the track, grouped by frame and sorted within each frame
    hashes: Vec<u32>,
    /// Frame index to its hashes
    index: BTreeMap<u32, IndexEntry>,
}

impl TrackStore {
    fn frame(&self, index: u32) -> &[u32] {
        match self.index.get(&index) {
            Some(entry) => &self.hashes[entry.offset..entry.offset + entry.len],
            None => &[],
        }
    }

    /// Frames from `index` to the next indexed frame, 0 at the last one
    fn next_increment(&self, index: u32) -> u32 {
        self.index
            .range(index + 1..)
            .next()
            .map(|(&next, _)| next - index)
            .unwrap_or(0)
    }

    fn add_frame(&mut self, index: u32, hashes: &[u32]) {
        let end = self.hashes.len();
        match self.index.get_mut(&index) {
            Some(entry) if entry.offset + entry.len == end => {
                self.hashes.extend_from_slice(hashes);
                entry.len += hashes.len();
                self.hashes[entry.offset..].sort_unstable();
            }
            Some(entry) => {
                // move the earlier hashes of the frame next to the new ones
                self.hashes.extend_from_within(entry.offset..entry.offset + entry.len);
                self.hashes.extend_from_slice(hashes);
                *entry = IndexEntry {
                    offset: end,
                    len: self.hashes.len() - end,
                };
                self.hashes[end..].sort_unstable();
            }
            None => {
                self.hashes.extend_from_slice(hashes);
                self.index.insert(
                    index,
                    IndexEntry {
                        offset: end,
                        len: hashes.len(),
                    },
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LookupEntry {
    track: TrackId,
    index: u32,
}

#[derive(Debug, Default)]
struct StoreState {
    tracks: HashMap<TrackId, TrackStore>,
    /// Hash to every place it occurs
    collisions: HashMap<u32, Vec<LookupEntry>>,
}

/// Counts equal values of two ascending lists
fn zipper_intersection(a: &[u32], b: &[u32]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            count += 1;
            i += 1;
            j += 1;
        }
    }
    count
}

/// Sub-fingerprints of many tracks, searchable for shared time-aligned runs.
///
/// Additions are serialized by one lock. Matching also takes the lock, so a
/// search sees the store as it was when the search began.
pub struct FingerprintStore {
    hash_time_scale: f64,
    min_frames: usize,
    max_frames: usize,
    threshold_accept: Vec<f64>,
    threshold_reject: Vec<f64>,
    state: Mutex<StoreState>,
}

impl FingerprintStore {
    pub fn new(profile: Profile) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            hash_time_scale: profile.hash_time_scale(),
            min_frames: profile.matching_min_frames,
            max_frames: profile.matching_max_frames,
            threshold_accept: profile.threshold_accept_curve(),
            threshold_reject: profile.threshold_reject_curve(),
            state: Mutex::new(StoreState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds sub-fingerprints of a track, in ascending frame order with the
    /// hashes of a frame sorted
    pub fn add(&self, track: TrackId, sub_fingerprints: &[SubFingerprint]) {
        if sub_fingerprints.is_empty() {
            return;
        }
        let mut state = self.lock();
        let StoreState { tracks, collisions } = &mut *state;
        let track_store = tracks.entry(track).or_default();

        let mut hashes = Vec::new();
        for run in sub_fingerprints.chunk_by(|a, b| a.index == b.index) {
            let index = run[0].index;
            hashes.clear();
            hashes.extend(run.iter().map(|sf| sf.hash));
            for &hash in &hashes {
                collisions
                    .entry(hash)
                    .or_default()
                    .push(LookupEntry { track, index });
            }
            track_store.add_frame(index, &hashes);
        }
    }

    pub fn track_count(&self) -> usize {
        self.lock().tracks.len()
    }

    /// Number of hashes occurring more than once
    pub fn collision_count(&self) -> usize {
        self.lock()
            .collisions
            .values()
            .filter(|entries| entries.len() > 1)
            .count()
    }

    /// Matches starting at the occurrences of one hash
    pub fn find_matches(&self, hash: u32) -> Vec<Match> {
        let state = self.lock();
        let mut matches = Vec::new();
        self.matches_of(&state, hash, &mut matches);
        matches
    }

    /// Matches of all colliding hashes
    pub fn find_all_matches(&self) -> Vec<Match> {
        self.find_all_matches_with_progress(|_| {})
    }

    /// Matches of all colliding hashes, reporting progress in percent
    pub fn find_all_matches_with_progress<F: FnMut(f64)>(&self, mut progress: F) -> Vec<Match> {
        let state = self.lock();
        let mut keys: Vec<u32> = state
            .collisions
            .iter()
            .filter(|(_, entries)| entries.len() > 1)
            .map(|(&hash, _)| hash)
            .collect();
        keys.sort_unstable();
        log::debug!("{} colliding keys", keys.len());

        let mut matches = Vec::new();
        for (count, &hash) in keys.iter().enumerate() {
            self.matches_of(&state, hash, &mut matches);
            if count % PROGRESS_INTERVAL == 0 {
                progress((count + 1) as f64 / keys.len() as f64 * 100.0);
            }
        }
        log::info!("{} matches from {} colliding keys", matches.len(), keys.len());
        matches
    }

    fn matches_of(&self, state: &StoreState, hash: u32, matches: &mut Vec<Match>) {
        let Some(entries) = state.collisions.get(&hash) else {
            return;
        };
        for (x, entry1) in entries.iter().enumerate() {
            for entry2 in &entries[x..] {
                if entry1.track == entry2.track {
                    continue;
                }
                let (Some(store1), Some(store2)) =
                    (state.tracks.get(&entry1.track), state.tracks.get(&entry2.track))
                else {
                    continue;
                };
                if let Some(similarity) = self.compare(store1, entry1.index, store2, entry2.index) {
                    matches.push(Match {
                        track1: entry1.track,
                        track1_time: entry1.index as f64 * self.hash_time_scale,
                        track2: entry2.track,
                        track2_time: entry2.index as f64 * self.hash_time_scale,
                        similarity,
                        source: MATCH_SOURCE.to_string(),
                    });
                }
            }
        }
    }

    /// Walks both tracks frame by frame from the given indices and returns the
    /// hash matching rate once it passes the accept threshold
    fn compare(
        &self,
        store1: &TrackStore,
        mut index1: u32,
        store2: &TrackStore,
        mut index2: u32,
    ) -> Option<f32> {
        let mut tried = 0usize;
        let mut matched = 0usize;
        let mut frames = 0usize;
        loop {
            let hashes1 = store1.frame(index1);
            let hashes2 = store2.frame(index2);
            let intersection = zipper_intersection(hashes1, hashes2);
            matched += intersection;
            tried += hashes1.len() + hashes2.len() - intersection;

            let increment = store1
                .next_increment(index1)
                .min(store2.next_increment(index2));
            index1 += increment;
            index2 += increment;
            frames += increment as usize;

            let rate = if tried == 0 {
                0.0
            } else {
                matched as f64 / tried as f64
            };
            if frames >= self.max_frames || rate < self.threshold_reject[frames] {
                return None;
            }
            if frames > self.min_frames && rate > self.threshold_accept[frames] {
                return Some(rate as f32);
            }
            if increment == 0 {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(frames: &[(u32, &[u32])]) -> Vec<SubFingerprint> {
        frames
            .iter()
            .flat_map(|(index, hashes)| hashes.iter().map(|&h| SubFingerprint::new(*index, h)))
            .collect()
    }

    #[test]
    fn test_zipper_intersection() {
        assert_eq!(zipper_intersection(&[1, 3, 5, 7], &[2, 3, 4, 7, 9]), 2);
        assert_eq!(zipper_intersection(&[], &[1]), 0);
        assert_eq!(zipper_intersection(&[4, 4], &[4]), 1);
    }

    #[test]
    fn test_add_indexes_frames() {
        let store = FingerprintStore::new(Profile::default()).unwrap();
        store.add(TrackId(0), &[]);
        assert_eq!(store.track_count(), 0);

        store.add(TrackId(0), &frames(&[(0, &[5, 9]), (3, &[1])]));
        store.add(TrackId(0), &frames(&[(3, &[7]), (4, &[9])]));
        store.add(TrackId(0), &frames(&[(0, &[2])]));
        assert_eq!(store.track_count(), 1);

        let state = store.lock();
        let track = &state.tracks[&TrackId(0)];
        assert_eq!(track.frame(0), &[2, 5, 9]);
        assert_eq!(track.frame(3), &[1, 7]);
        assert_eq!(track.frame(4), &[9]);
        assert!(track.frame(1).is_empty());
        assert_eq!(track.next_increment(0), 3);
        assert_eq!(track.next_increment(1), 2);
        assert_eq!(track.next_increment(4), 0);
        assert_eq!(state.collisions[&9].len(), 2);
    }

    #[test]
    fn test_identical_runs_match() {
        let store = FingerprintStore::new(Profile::default()).unwrap();
        let run: Vec<(u32, &[u32])> = (0..40).map(|i| (i, &[10u32, 20, 30][..])).collect();
        let mut shifted = run.clone();
        for frame in shifted.iter_mut() {
            frame.0 += 100;
        }
        store.add(TrackId(1), &frames(&run));
        store.add(TrackId(2), &frames(&shifted));
        assert_eq!(store.collision_count(), 3);

        let matches = store.find_matches(10);
        assert!(!matches.is_empty());
        let aligned = matches
            .iter()
            .find(|m| m.track1_time == 0.0)
            .expect("match at the first frame");
        assert_eq!(aligned.track1, TrackId(1));
        assert_eq!(aligned.track2, TrackId(2));
        assert!((aligned.track2_time - 100.0 * store.hash_time_scale).abs() < 1e-9);
        assert_eq!(aligned.similarity, 1.0);
        assert_eq!(aligned.source, MATCH_SOURCE);

        let mut reports = Vec::new();
        let all = store.find_all_matches_with_progress(|p| reports.push(p));
        assert_eq!(all.len(), 3 * matches.len());
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_disjoint_runs_do_not_match() {
        let store = FingerprintStore::new(Profile::default()).unwrap();
        let a: Vec<(u32, &[u32])> = (0..40).map(|i| (i, &[1u32, 2, 3][..])).collect();
        let b: Vec<(u32, &[u32])> = (0..40)
            .map(|i| (i, if i == 0 { &[1u32, 50, 60][..] } else { &[40u32, 50, 60][..] }))
            .collect();
        store.add(TrackId(1), &frames(&a));
        store.add(TrackId(2), &frames(&b));
        assert!(store.find_matches(1).is_empty());
        assert!(store.find_matches(12345).is_empty());
    }
}
