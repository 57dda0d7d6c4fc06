//! Matches between tracks and their post-processing
//!
//! A [`Match`] states that two tracks play the same content at the given
//! times. The functions here remove duplicates, group matches by track pair,
//! reduce them to one match per pair or per time window, connect tracks into
//! groups and turn a pair's matches into time warp anchors or intervals.

use crate::error::{AudioError, Result};
use crate::timewarp::{TimeWarp, TimeWarpCollection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;


/// Identifies a track in a fingerprint store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Two tracks playing the same content at `track1_time` and `track2_time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub track1: TrackId,
    /// Seconds into track 1
    pub track1_time: f64,
    pub track2: TrackId,
    /// Seconds into track 2
    pub track2_time: f64,
    /// Hash matching rate in [0, 1]
    pub similarity: f32,
    /// Name of the matcher that found the match
    pub source: String,
}

impl Match {
    /// Seconds track 1 is ahead of track 2 at the matched content
    pub fn offset(&self) -> f64 {
        self.track1_time - self.track2_time
    }

    /// The same match with the track roles exchanged
    pub fn swap_tracks(&self) -> Match {
        Match {
            track1: self.track2,
            track1_time: self.track2_time,
            track2: self.track1,
            track2_time: self.track1_time,
            similarity: self.similarity,
            source: self.source.clone(),
        }
    }

    fn involves(&self, track: TrackId) -> bool {
        self.track1 == track || self.track2 == track
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Match({} @ {:.3}s <-> {} @ {:.3}s, {:.3}, {})",
            self.track1, self.track1_time, self.track2, self.track2_time, self.similarity, self.source
        )
    }
}

/// How to reduce several matches of a track pair to one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchFilterMode {
    /// Highest similarity
    #[default]
    Best,
    /// Earliest in track 1
    First,
    /// Median by track 1 time
    Mid,
    /// Latest in track 1
    Last,
}

impl FromStr for MatchFilterMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(MatchFilterMode::Best),
            "first" => Ok(MatchFilterMode::First),
            "mid" => Ok(MatchFilterMode::Mid),
            "last" => Ok(MatchFilterMode::Last),
            other => Err(format!(
                "unknown filter mode '{}', expected best, first, mid or last",
                other
            )),
        }
    }
}

impl fmt::Display for MatchFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchFilterMode::Best => "best",
            MatchFilterMode::First => "first",
            MatchFilterMode::Mid => "mid",
            MatchFilterMode::Last => "last",
        };
        f.write_str(name)
    }
}

/// Matches of one track pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub track1: TrackId,
    pub track2: TrackId,
    pub matches: Vec<Match>,
}

impl MatchPair {
    /// Mean similarity of the pair's matches, 0 without matches
    pub fn average_similarity(&self) -> f32 {
        if self.matches.is_empty() {
            return 0.0;
        }
        self.matches.iter().map(|m| m.similarity).sum::<f32>() / self.matches.len() as f32
    }
}

/// Tracks connected through matches, with the pairs of a spanning tree over them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchGroup {
    /// In the order the tracks were given
    pub tracks: Vec<TrackId>,
    pub pairs: Vec<MatchPair>,
}

/// A time range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

/// Offset drift in seconds up to which consecutive matches form one interval
pub const DEFAULT_INTERVAL_THRESHOLD: f64 = 1.0;

/// Time key for grouping, in 100 ns ticks
fn ticks(seconds: f64) -> i64 {
    (seconds * 1e7).round() as i64
}

/// Removes matches that repeat an earlier match, in either track order
pub fn filter_duplicate_matches(matches: &[Match]) -> Vec<Match> {
    filter_duplicate_matches_with_progress(matches, |_| {})
}

/// [`filter_duplicate_matches`] reporting progress in percent
pub fn filter_duplicate_matches_with_progress<F: FnMut(f64)>(
    matches: &[Match],
    mut progress: F,
) -> Vec<Match> {
    // only matches with the same time sum can be duplicates
    let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut filtered: Vec<Match> = Vec::new();
    let total = matches.len();

    for (i, m) in matches.iter().enumerate() {
        let group = groups.entry(ticks(m.track1_time + m.track2_time)).or_default();
        let duplicate = group.iter().any(|&j| {
            let other = &filtered[j];
            let same = other.track1 == m.track1
                && other.track2 == m.track2
                && ticks(other.track1_time) == ticks(m.track1_time);
            let swapped = other.track1 == m.track2
                && other.track2 == m.track1
                && ticks(other.track1_time) == ticks(m.track2_time);
            (same || swapped) && other.similarity == m.similarity
        });
        if !duplicate {
            group.push(filtered.len());
            filtered.push(m.clone());
        }

        let done = i + 1;
        if done % 1000 == 0 || done == total {
            progress(done as f64 / total as f64 * 100.0);
        }
    }

    if filtered.len() < matches.len() {
        log::debug!(
            "Removed {} duplicate matches",
            matches.len() - filtered.len()
        );
    }
    filtered
}

/// All unordered pairs of `tracks`
pub fn track_pairs(tracks: &[TrackId]) -> Vec<(TrackId, TrackId)> {
    let mut pairs = Vec::new();
    for (x, &a) in tracks.iter().enumerate() {
        for &b in &tracks[x + 1..] {
            pairs.push((a, b));
        }
    }
    pairs
}

/// Groups matches by track pair, in either orientation; pairs without matches
/// are left out
pub fn pair_matches(pairs: &[(TrackId, TrackId)], matches: &[Match]) -> Vec<MatchPair> {
    pairs
        .iter()
        .filter_map(|&(track1, track2)| {
            let pair_matches: Vec<Match> = matches
                .iter()
                .filter(|m| {
                    (m.track1 == track1 && m.track2 == track2)
                        || (m.track1 == track2 && m.track2 == track1)
                })
                .cloned()
                .collect();
            if pair_matches.is_empty() {
                None
            } else {
                Some(MatchPair {
                    track1,
                    track2,
                    matches: pair_matches,
                })
            }
        })
        .collect()
}

/// Checks that all matches belong to one pair of distinct tracks and returns it
fn validate_pair(matches: &[Match]) -> Result<(TrackId, TrackId)> {
    let Some(first) = matches.first() else {
        return Err(AudioError::MatchProcessing("no matches to filter".to_string()));
    };
    let pair = (first.track1, first.track2);
    let single_pair = pair.0 != pair.1
        && matches
            .iter()
            .all(|m| m.involves(pair.0) && m.involves(pair.1) && m.track1 != m.track2);
    if !single_pair {
        return Err(AudioError::MatchProcessing(
            "matches must belong to a single pair of tracks".to_string(),
        ));
    }
    Ok(pair)
}

/// Picks one match of a track pair according to `mode`
pub fn filter(matches: &[Match], mode: MatchFilterMode) -> Result<Match> {
    validate_pair(matches)?;
    let chosen = match mode {
        MatchFilterMode::Best => matches
            .iter()
            .reduce(|best, m| if m.similarity > best.similarity { m } else { best }),
        MatchFilterMode::First | MatchFilterMode::Mid | MatchFilterMode::Last => {
            let mut ordered: Vec<&Match> = matches.iter().collect();
            ordered.sort_by(|a, b| a.track1_time.total_cmp(&b.track1_time));
            match mode {
                MatchFilterMode::First => ordered.first().copied(),
                MatchFilterMode::Mid => ordered.get(ordered.len() / 2).copied(),
                _ => ordered.last().copied(),
            }
        }
    };
    chosen
        .cloned()
        .ok_or_else(|| AudioError::MatchProcessing("no matches to filter".to_string()))
}

/// Picks one match per window of `window` seconds over track 1 time.
///
/// Matches are first oriented so that track 1 is the first match's track 1.
pub fn window_filter(matches: &[Match], mode: MatchFilterMode, window: f64) -> Result<Vec<Match>> {
    let (track1, _) = validate_pair(matches)?;
    if !(window > 0.0 && window.is_finite()) {
        return Err(AudioError::InvalidConfiguration(format!(
            "invalid filter window of {} seconds",
            window
        )));
    }

    let mut oriented: Vec<Match> = matches
        .iter()
        .map(|m| if m.track1 == track1 { m.clone() } else { m.swap_tracks() })
        .collect();
    oriented.sort_by(|a, b| a.track1_time.total_cmp(&b.track1_time));
    let last = oriented
        .last()
        .map(|m| m.track1_time)
        .unwrap_or_default();

    let mut filtered = Vec::new();
    let mut window_matches = Vec::new();
    let mut k = 0u64;
    loop {
        let start = k as f64 * window;
        if start > last {
            break;
        }
        let end = start + window;
        window_matches.clear();
        window_matches.extend(
            oriented
                .iter()
                .filter(|m| m.track1_time >= start && m.track1_time < end)
                .cloned(),
        );
        if !window_matches.is_empty() {
            filtered.push(filter(&window_matches, mode)?);
        }
        k += 1;
    }
    Ok(filtered)
}

/// Turns the matches of a track pair into warp anchors for `track_to_warp`.
///
/// The first match anchors the warped track at its own time; every further
/// match moves its time in the warped track to keep the distance it has to
/// the first match in the other track. Fewer than two matches give an empty
/// collection.
pub fn time_warps(matches: &[Match], track_to_warp: TrackId) -> Result<TimeWarpCollection> {
    let (a, b) = validate_pair(matches)?;
    if track_to_warp != a && track_to_warp != b {
        return Err(AudioError::MatchProcessing(format!(
            "track {} does not belong to the matches",
            track_to_warp
        )));
    }

    let mut collection = TimeWarpCollection::new();
    if matches.len() < 2 {
        return Ok(collection);
    }

    let oriented: Vec<Match> = matches
        .iter()
        .map(|m| if m.track2 == track_to_warp { m.clone() } else { m.swap_tracks() })
        .collect();
    let m1 = &oriented[0];
    let warps = std::iter::once(TimeWarp::new(m1.track2_time, m1.track2_time)).chain(
        oriented[1..].iter().map(|m| {
            TimeWarp::new(m.track2_time, m1.track2_time + (m.track1_time - m1.track1_time))
        }),
    );
    collection.add_range(warps)?;
    Ok(collection)
}

/// Drops every match that points to the same time in one of the two tracks
/// as the match kept before it.
///
/// A section of one track cannot be warped onto an instant of the other, so
/// of coincident matches only the first survives. Matches are expected in
/// time order, as [`window_filter`] returns them.
pub fn filter_coincident_matches(pairs: &mut [MatchPair]) {
    for pair in pairs.iter_mut() {
        let before = pair.matches.len();
        let mut previous: Option<(i64, i64)> = None;
        let track1 = pair.track1;
        pair.matches.retain(|m| {
            let times = if m.track1 == track1 {
                (ticks(m.track1_time), ticks(m.track2_time))
            } else {
                (ticks(m.track2_time), ticks(m.track1_time))
            };
            match previous {
                Some((t1, t2)) if t1 == times.0 || t2 == times.1 => false,
                _ => {
                    previous = Some(times);
                    true
                }
            }
        });
        if pair.matches.len() < before {
            log::debug!(
                "Removed {} coincident matches between {} and {}",
                before - pair.matches.len(),
                pair.track1,
                pair.track2
            );
        }
    }
}

/// Disjoint sets over track indices
struct Components {
    parent: Vec<usize>,
}

impl Components {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Joins the sets of `a` and `b`, false if they already were one
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return false;
        }
        self.parent[b] = a;
        true
    }
}

/// Groups `tracks` into sets connected through matches.
///
/// The matches of each track pair are first reduced with `mode`, to one match
/// per pair or, with a `window`, to one match per window. Without a mode all
/// matches are kept. Each group carries the pairs of a minimum spanning tree
/// over its tracks, weighted by `1 - average similarity`, so the most similar
/// pairs connect the group. Tracks without any match belong to no group.
pub fn determine_match_groups(
    tracks: &[TrackId],
    matches: &[Match],
    mode: Option<MatchFilterMode>,
    window: Option<f64>,
) -> Result<Vec<MatchGroup>> {
    let mut pairs = pair_matches(&track_pairs(tracks), matches);
    if let Some(mode) = mode {
        for pair in pairs.iter_mut() {
            pair.matches = match window {
                Some(window) => window_filter(&pair.matches, mode, window)?,
                None => vec![filter(&pair.matches, mode)?],
            };
        }
    }

    let index: HashMap<TrackId, usize> = tracks
        .iter()
        .enumerate()
        .map(|(i, &track)| (track, i))
        .collect();
    let ends = |pair: &MatchPair| (index[&pair.track1], index[&pair.track2]);

    // Kruskal, ties keep the pair order
    let weights: Vec<f32> = pairs.iter().map(|p| 1.0 - p.average_similarity()).collect();
    let mut order: Vec<usize> = (0..pairs.len()).collect();
    order.sort_by(|&a, &b| weights[a].total_cmp(&weights[b]));
    let mut components = Components::new(tracks.len());
    let mut connected = vec![false; tracks.len()];
    let mut in_tree = vec![false; pairs.len()];
    for i in order {
        let (a, b) = ends(&pairs[i]);
        connected[a] = true;
        connected[b] = true;
        in_tree[i] = components.union(a, b);
    }

    let mut groups: Vec<MatchGroup> = Vec::new();
    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    for (i, &track) in tracks.iter().enumerate() {
        if !connected[i] {
            continue;
        }
        let root = components.find(i);
        let group = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(MatchGroup::default());
            groups.len() - 1
        });
        groups[group].tracks.push(track);
    }
    for (i, pair) in pairs.into_iter().enumerate() {
        if in_tree[i] {
            let root = components.find(ends(&pair).0);
            groups[group_of_root[&root]].pairs.push(pair);
        }
    }

    log::debug!(
        "{} match groups over {} tracks",
        groups.len(),
        connected.iter().filter(|&&c| c).count()
    );
    Ok(groups)
}

/// Splits time-ordered matches of one track pair into runs of steady offset.
///
/// A new run starts where the offset of consecutive matches differs by more
/// than `threshold` seconds. Each run yields the interval it covers in track 1
/// and the interval it covers in track 2, so a track made of two excerpts of
/// another gives two interval pairs. All matches must name the tracks in the
/// same order.
pub fn convert_to_intervals(matches: &[Match], threshold: f64) -> Result<Vec<(Interval, Interval)>> {
    let (track1, track2) = validate_pair(matches)?;
    if matches.iter().any(|m| m.track1 != track1 || m.track2 != track2) {
        return Err(AudioError::MatchProcessing(
            "matches must name the tracks in the same order".to_string(),
        ));
    }

    let span = |start: &Match, end: &Match| {
        (
            Interval::new(start.track1_time, end.track1_time),
            Interval::new(start.track2_time, end.track2_time),
        )
    };
    let mut intervals = Vec::new();
    let mut start = &matches[0];
    for window in matches.windows(2) {
        let (previous, m) = (&window[0], &window[1]);
        if (previous.offset() - m.offset()).abs() > threshold {
            intervals.push(span(start, previous));
            start = m;
        }
    }
    intervals.push(span(start, &matches[matches.len() - 1]));
    Ok(intervals)
}
