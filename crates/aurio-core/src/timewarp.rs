//! Piecewise-linear time mapping between a source and its warped timeline

use crate::error::{AudioError, Result};
use crate::resampler::check_ratio;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maps a source time (`from`) to a warped time (`to`), both in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWarp {
    pub from: f64,
    pub to: f64,
}

impl TimeWarp {
    pub fn new(from: f64, to: f64) -> Self {
        Self { from, to }
    }

    pub fn offset(&self) -> f64 {
        self.to - self.from
    }

    /// Resampling ratio of the interval between two anchors
    pub fn calculate_ratio(lower: &TimeWarp, upper: &TimeWarp) -> f64 {
        (upper.to - lower.to) / (upper.from - lower.from)
    }
}

impl fmt::Display for TimeWarp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeWarp({:.6}s -> {:.6}s)", self.from, self.to)
    }
}

/// Anchors kept sorted by source time.
///
/// Every mutation re-validates the whole set: warped times must not run
/// backwards and each pair of anchors must imply a ratio the resampler
/// accepts. A rejected mutation leaves the collection unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWarpCollection {
    warps: Vec<TimeWarp>,
}

impl TimeWarpCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, warp: TimeWarp) -> Result<()> {
        self.add_range(std::iter::once(warp))
    }

    /// Adds several anchors and validates once
    pub fn add_range<I: IntoIterator<Item = TimeWarp>>(&mut self, warps: I) -> Result<()> {
        let mut candidate = self.warps.clone();
        for warp in warps {
            if !warp.from.is_finite() || !warp.to.is_finite() {
                return Err(AudioError::InvalidRange(format!("{} is not finite", warp)));
            }
            candidate.push(warp);
        }
        candidate.sort_by(|a, b| a.from.total_cmp(&b.from));
        validate(&candidate)?;
        self.warps = candidate;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<TimeWarp> {
        if index < self.warps.len() {
            Some(self.warps.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.warps.clear();
    }

    pub fn len(&self) -> usize {
        self.warps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeWarp> {
        self.warps.iter()
    }

    pub fn as_slice(&self) -> &[TimeWarp] {
        &self.warps
    }

    /// Anchors enclosing a source time.
    ///
    /// Before the first anchor only the upper one is set, at or after the last
    /// anchor only the lower one.
    pub fn bounding_warps_for_source_position(
        &self,
        position: f64,
    ) -> (Option<&TimeWarp>, Option<&TimeWarp>) {
        bounding(&self.warps, |w| position < w.from)
    }

    /// Anchors enclosing a warped time
    pub fn bounding_warps_for_warped_position(
        &self,
        position: f64,
    ) -> (Option<&TimeWarp>, Option<&TimeWarp>) {
        bounding(&self.warps, |w| position < w.to)
    }

    /// Maps a source time onto the warped timeline.
    ///
    /// Outside the anchored range the nearest anchor's offset applies.
    pub fn translate_source_to_warped_position(&self, position: f64) -> f64 {
        match self.bounding_warps_for_source_position(position) {
            (Some(lower), Some(upper)) => {
                lower.to + (position - lower.from) * TimeWarp::calculate_ratio(lower, upper)
            }
            (None, Some(upper)) => position + upper.offset(),
            (Some(lower), None) => position + lower.offset(),
            (None, None) => position,
        }
    }
}

impl<'a> IntoIterator for &'a TimeWarpCollection {
    type Item = &'a TimeWarp;
    type IntoIter = std::slice::Iter<'a, TimeWarp>;

    fn into_iter(self) -> Self::IntoIter {
        self.warps.iter()
    }
}

fn bounding<F>(warps: &[TimeWarp], is_above: F) -> (Option<&TimeWarp>, Option<&TimeWarp>)
where
    F: Fn(&TimeWarp) -> bool,
{
    match warps.iter().position(is_above) {
        Some(0) => (None, warps.first()),
        Some(x) => (Some(&warps[x - 1]), Some(&warps[x])),
        None => (warps.last(), None),
    }
}

fn validate(warps: &[TimeWarp]) -> Result<()> {
    for (x, a) in warps.iter().enumerate() {
        for b in &warps[x + 1..] {
            if a.to > b.to {
                return Err(AudioError::InvalidConfiguration(format!(
                    "{} is overlapping {}",
                    a, b
                )));
            }
            let ratio = TimeWarp::calculate_ratio(a, b);
            if !check_ratio(ratio) {
                return Err(AudioError::InvalidConfiguration(format!(
                    "invalid sample rate ratio {} between {} and {}",
                    ratio, a, b
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translate_between_and_outside_anchors() {
        let mut collection = TimeWarpCollection::new();
        collection.add(TimeWarp::new(5.0, 0.0)).unwrap();
        collection.add(TimeWarp::new(15.0, 15.0)).unwrap();

        assert_relative_eq!(collection.translate_source_to_warped_position(0.0), -5.0);
        assert_relative_eq!(collection.translate_source_to_warped_position(5.0), 0.0);
        assert_relative_eq!(collection.translate_source_to_warped_position(10.0), 7.5);
        assert_relative_eq!(collection.translate_source_to_warped_position(15.0), 15.0);
        assert_relative_eq!(collection.translate_source_to_warped_position(20.0), 20.0);
    }

    #[test]
    fn test_identity_anchors_translate_unchanged() {
        let mut collection = TimeWarpCollection::new();
        collection
            .add_range([
                TimeWarp::new(40.0, 40.0),
                TimeWarp::new(-5.0, -5.0),
                TimeWarp::new(20.0, 20.0),
                TimeWarp::new(10.0, 10.0),
            ])
            .unwrap();
        let froms: Vec<f64> = collection.iter().map(|w| w.from).collect();
        assert_eq!(froms, vec![-5.0, 10.0, 20.0, 40.0]);

        for x in -10..=50 {
            let x = x as f64;
            assert_relative_eq!(collection.translate_source_to_warped_position(x), x);
        }
    }

    #[test]
    fn test_overlap_is_rejected_and_collection_unchanged() {
        let mut collection = TimeWarpCollection::new();
        collection.add(TimeWarp::new(10.0, 10.0)).unwrap();
        let result = collection.add(TimeWarp::new(20.0, 5.0));
        assert!(matches!(result, Err(AudioError::InvalidConfiguration(_))));
        assert_eq!(collection.len(), 1);

        // same source time implies an infinite ratio
        assert!(collection.add(TimeWarp::new(10.0, 12.0)).is_err());
        assert!(collection.add(TimeWarp::new(f64::NAN, 1.0)).is_err());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_bounding_warps() {
        let mut collection = TimeWarpCollection::new();
        collection
            .add_range([TimeWarp::new(10.0, 12.0), TimeWarp::new(20.0, 30.0)])
            .unwrap();

        let (lower, upper) = collection.bounding_warps_for_source_position(5.0);
        assert!(lower.is_none());
        assert_eq!(upper.unwrap().from, 10.0);

        let (lower, upper) = collection.bounding_warps_for_source_position(15.0);
        assert_eq!(lower.unwrap().from, 10.0);
        assert_eq!(upper.unwrap().from, 20.0);

        let (lower, upper) = collection.bounding_warps_for_warped_position(30.0);
        assert_eq!(lower.unwrap().to, 30.0);
        assert!(upper.is_none());

        assert_eq!(collection.remove(0).unwrap().from, 10.0);
        assert!(collection.remove(5).is_none());
        collection.clear();
        assert!(collection.is_empty());
        assert_eq!(collection.bounding_warps_for_source_position(1.0), (None, None));
    }

    #[test]
    fn test_ratio_and_offset() {
        let a = TimeWarp::new(2.0, 3.0);
        let b = TimeWarp::new(4.0, 7.0);
        assert_relative_eq!(a.offset(), 1.0);
        assert_relative_eq!(TimeWarp::calculate_ratio(&a, &b), 2.0);
    }
}
