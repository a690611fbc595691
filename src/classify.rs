//! Bucket classification and active-bucket selection
//!
//! The noise codomain [0, 1] is split into `bucket_count` equal bands. A subset of
//! those bands is marked active using a [`BucketSelector`]; the built-in
//! [`StrategySelector`] implements the `smallest`/`largest`/`random` strategies.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SelectionStrategy;

/// Map a noise value in [0, 1] to its bucket id. NaN maps to no bucket.
pub fn bucket_for(value: f64, bucket_count: u32) -> Option<u8> {
    if value.is_nan() || bucket_count == 0 {
        return None;
    }
    let max = bucket_count.min(256) as i64 - 1;
    let id = (value * bucket_count as f64).floor() as i64;
    Some(id.clamp(0, max) as u8)
}

/// Centre of a bucket's band in noise space.
pub fn bucket_center(id: u8, bucket_count: u32) -> f64 {
    (id as f64 + 0.5) / bucket_count as f64
}

/// True when `value` lies within `band_width` of the centre of bucket `id`.
pub fn in_band(value: f64, id: u8, bucket_count: u32, band_width: f64) -> bool {
    (value - bucket_center(id, bucket_count)).abs() <= band_width
}

// =============================================================================
// SELECTION
// =============================================================================

/// Chooses which buckets are active from per-bucket coarse sample counts.
///
/// Implementations return ids in priority order; the caller trims the result to
/// the requested size and back-fills if too few valid ids come back.
pub trait BucketSelector: Send + Sync {
    fn select(&self, counts: &[usize], want: usize) -> Vec<u8>;

    fn name(&self) -> &str {
        "custom"
    }
}

/// Built-in selector for the configured [`SelectionStrategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrategySelector {
    pub strategy: SelectionStrategy,
    /// Shuffle seed for [`SelectionStrategy::Random`]
    pub seed: u64,
}

impl StrategySelector {
    pub fn new(strategy: SelectionStrategy, seed: u64) -> Self {
        Self { strategy, seed }
    }
}

impl BucketSelector for StrategySelector {
    fn select(&self, counts: &[usize], want: usize) -> Vec<u8> {
        let ids = (0..counts.len().min(256)).map(|i| i as u8);
        let mut populated: Vec<u8> = ids.clone().filter(|&i| counts[i as usize] > 0).collect();
        let mut empty: Vec<u8> = ids.filter(|&i| counts[i as usize] == 0).collect();

        match self.strategy {
            SelectionStrategy::Smallest => {
                populated.sort_by_key(|&i| (counts[i as usize], i));
            }
            SelectionStrategy::Largest => {
                populated.sort_by_key(|&i| (std::cmp::Reverse(counts[i as usize]), i));
            }
            SelectionStrategy::Random => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                populated.shuffle(&mut rng);
                empty.shuffle(&mut rng);
            }
        }

        populated.extend(empty);
        populated.truncate(want);
        populated
    }

    fn name(&self) -> &str {
        match self.strategy {
            SelectionStrategy::Smallest => "smallest",
            SelectionStrategy::Largest => "largest",
            SelectionStrategy::Random => "random",
        }
    }
}

/// The active subset of buckets together with the counts it was chosen from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveBuckets {
    /// Active ids, ascending
    ids: Vec<u8>,
    /// Coarse sample count of every bucket
    counts: Vec<usize>,
}

impl ActiveBuckets {
    pub fn contains(&self, id: u8) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn ids(&self) -> &[u8] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sample counts of all buckets (active or not).
    pub fn all_counts(&self) -> &[usize] {
        &self.counts
    }

    /// `{bucket id: sample count}` for the active buckets only.
    pub fn active_counts(&self) -> BTreeMap<u8, usize> {
        self.ids
            .iter()
            .map(|&id| (id, self.counts.get(id as usize).copied().unwrap_or(0)))
            .collect()
    }
}

/// Pick the active bucket set.
///
/// A forced list bypasses the selector entirely (out-of-range ids are dropped).
/// Otherwise exactly `min(max_active, counts.len())` buckets are returned.
pub fn select_active_buckets(
    counts: &[usize],
    max_active: usize,
    selector: &dyn BucketSelector,
    forced: Option<&[u32]>,
) -> ActiveBuckets {
    let bucket_count = counts.len().min(256);

    let mut ids: Vec<u8> = match forced {
        Some(list) => list
            .iter()
            .filter(|&&id| (id as usize) < bucket_count)
            .map(|&id| id as u8)
            .collect(),
        None => {
            let want = max_active.min(bucket_count);
            let mut chosen: Vec<u8> = Vec::with_capacity(want);
            for id in selector.select(counts, want) {
                if (id as usize) < bucket_count && !chosen.contains(&id) && chosen.len() < want {
                    chosen.push(id);
                }
            }
            // Back-fill a short answer from a custom selector, fewest samples first
            if chosen.len() < want {
                let fallback = StrategySelector::new(SelectionStrategy::Smallest, 0);
                for id in fallback.select(counts, bucket_count) {
                    if chosen.len() == want {
                        break;
                    }
                    if !chosen.contains(&id) {
                        chosen.push(id);
                    }
                }
            }
            chosen
        }
    };

    ids.sort_unstable();
    ids.dedup();
    ActiveBuckets {
        ids,
        counts: counts[..bucket_count].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(counts: &[usize], max: usize, strategy: SelectionStrategy) -> Vec<u8> {
        let selector = StrategySelector::new(strategy, 99);
        select_active_buckets(counts, max, &selector, None).ids().to_vec()
    }

    #[test]
    fn test_buckets_partition_unit_interval() {
        for n in 1..=12u32 {
            for i in 0..=1000 {
                let v = i as f64 / 1000.0;
                let id = bucket_for(v, n).unwrap() as u32;
                assert!(id < n);
                let lo = id as f64 / n as f64;
                let hi = (id + 1) as f64 / n as f64;
                // v == 1.0 is clamped into the last band
                assert!(v >= lo - 1e-12 && (v < hi + 1e-12 || id == n - 1));
            }
        }
        assert_eq!(bucket_for(f64::NAN, 3), None);
        assert_eq!(bucket_for(-0.2, 3), Some(0));
        assert_eq!(bucket_for(1.7, 3), Some(2));
    }

    #[test]
    fn test_band_test() {
        assert!((bucket_center(1, 4) - 0.375).abs() < 1e-12);
        assert!(in_band(0.4, 1, 4, 0.05));
        assert!(!in_band(0.45, 1, 4, 0.05));
    }

    #[test]
    fn test_smallest_and_largest_with_ties() {
        let counts = [5, 2, 2, 9];
        assert_eq!(select(&counts, 2, SelectionStrategy::Smallest), vec![1, 2]);
        assert_eq!(select(&counts, 1, SelectionStrategy::Largest), vec![3]);
        assert_eq!(select(&counts, 2, SelectionStrategy::Largest), vec![0, 3]);
    }

    #[test]
    fn test_falls_back_to_empty_buckets() {
        let counts = [0, 10, 0, 0];
        let ids = select(&counts, 3, SelectionStrategy::Smallest);
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(select(&counts, 3, SelectionStrategy::Random).len(), 3);
    }

    #[test]
    fn test_active_set_size_invariant() {
        let counts = [3, 0, 7, 1, 0, 4];
        for strategy in [SelectionStrategy::Smallest, SelectionStrategy::Largest, SelectionStrategy::Random] {
            for max in 1..=8 {
                assert_eq!(select(&counts, max, strategy).len(), max.min(counts.len()));
            }
        }
    }

    #[test]
    fn test_random_is_seeded() {
        let counts = [1, 2, 3, 4, 5, 6, 7, 8];
        let a = StrategySelector::new(SelectionStrategy::Random, 5).select(&counts, 3);
        let b = StrategySelector::new(SelectionStrategy::Random, 5).select(&counts, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_forced_ids_bypass_strategy() {
        let selector = StrategySelector::new(SelectionStrategy::Smallest, 0);
        let active = select_active_buckets(&[0, 100, 0], 2, &selector, Some(&[1]));
        assert_eq!(active.ids(), &[1]);
        assert!(active.contains(1));
        assert!(!active.contains(0));
        assert_eq!(active.active_counts(), BTreeMap::from([(1u8, 100usize)]));

        let dropped = select_active_buckets(&[1, 1, 1], 2, &selector, Some(&[2, 7, 2]));
        assert_eq!(dropped.ids(), &[2]);
    }

    struct OnlyFirst;

    impl BucketSelector for OnlyFirst {
        fn select(&self, _counts: &[usize], _want: usize) -> Vec<u8> {
            vec![0, 0, 200]
        }
    }

    #[test]
    fn test_custom_selector_is_sanitised_and_backfilled() {
        let active = select_active_buckets(&[4, 1, 3], 2, &OnlyFirst, None);
        assert_eq!(active.ids(), &[0, 1]);
    }
}
