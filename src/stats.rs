//! Per-feed detection statistics.
//!
//! `StatsAggregator` is the only state shared between stream publishers. One
//! mutex guards every feed's counts and identity sets, so `record`,
//! `snapshot`, and `reset` are mutually atomic: a snapshot never mixes values
//! from before and after a concurrent reset or record. Per-frame work (tallying
//! classes, collecting track ids) happens before the lock is taken; the
//! critical sections only touch counters and sets.
//!
//! Each feed counts in one of two modes:
//! - `Cumulative`: number of distinct track ids ever seen per class, until
//!   reset. Detections without a track id cannot be deduplicated and are
//!   not counted.
//! - `Instantaneous`: per-class detection count of the latest frame,
//!   overwritten on every record.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;

use crate::classify::{ClassifiedDetection, EntityClass};

/// Statistics policy for one feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountingMode {
    #[default]
    Cumulative,
    Instantaneous,
}

impl FromStr for CountingMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cumulative" => Ok(CountingMode::Cumulative),
            "instantaneous" => Ok(CountingMode::Instantaneous),
            other => Err(anyhow!(
                "unknown counting mode '{}'; expected cumulative or instantaneous",
                other
            )),
        }
    }
}

/// Count per recognised class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassCounts([u64; EntityClass::COUNT]);

impl ClassCounts {
    pub fn get(&self, class: EntityClass) -> u64 {
        self.0[class.index()]
    }

    pub fn set(&mut self, class: EntityClass, value: u64) {
        self.0[class.index()] = value;
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Tally detections of one frame by class.
    pub fn from_detections(detections: &[ClassifiedDetection]) -> Self {
        let mut counts = Self::default();
        for det in detections {
            counts.0[det.class.index()] += 1;
        }
        counts
    }

    fn add(&mut self, other: &ClassCounts) {
        for (sum, value) in self.0.iter_mut().zip(other.0.iter()) {
            *sum += value;
        }
    }
}

/// Externally visible statistics: per-class counts and their sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub soldier: u64,
    pub civilian: u64,
    pub total: u64,
}

impl From<ClassCounts> for StatsSnapshot {
    fn from(counts: ClassCounts) -> Self {
        Self {
            soldier: counts.get(EntityClass::Soldier),
            civilian: counts.get(EntityClass::Civilian),
            total: counts.total(),
        }
    }
}

#[derive(Debug, Default)]
struct FeedState {
    counts: ClassCounts,
    seen: [HashSet<u32>; EntityClass::COUNT],
}

impl FeedState {
    fn clear(&mut self) {
        self.counts = ClassCounts::default();
        for ids in &mut self.seen {
            ids.clear();
        }
    }
}

/// Process-wide statistics, partitioned by feed.
#[derive(Debug)]
pub struct StatsAggregator {
    modes: BTreeMap<String, CountingMode>,
    state: Mutex<BTreeMap<String, FeedState>>,
}

impl StatsAggregator {
    /// Aggregator over a fixed set of feeds.
    pub fn new<I, S>(feeds: I) -> Self
    where
        I: IntoIterator<Item = (S, CountingMode)>,
        S: Into<String>,
    {
        let modes: BTreeMap<String, CountingMode> = feeds
            .into_iter()
            .map(|(name, mode)| (name.into(), mode))
            .collect();
        let state = modes
            .keys()
            .map(|name| (name.clone(), FeedState::default()))
            .collect();
        Self {
            modes,
            state: Mutex::new(state),
        }
    }

    pub fn feeds(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(|name| name.as_str())
    }

    pub fn mode(&self, feed: &str) -> Option<CountingMode> {
        self.modes.get(feed).copied()
    }

    /// Fold one frame's classified detections into `feed`'s statistics.
    ///
    /// Returns the feed's counts after the update.
    pub fn record(&self, feed: &str, detections: &[ClassifiedDetection]) -> Result<ClassCounts> {
        let mode = self
            .mode(feed)
            .ok_or_else(|| anyhow!("unknown feed '{}'", feed))?;
        match mode {
            CountingMode::Instantaneous => {
                let frame_counts = ClassCounts::from_detections(detections);
                let mut state = self.lock()?;
                let feed_state = state
                    .get_mut(feed)
                    .ok_or_else(|| anyhow!("unknown feed '{}'", feed))?;
                feed_state.counts = frame_counts;
                Ok(feed_state.counts)
            }
            CountingMode::Cumulative => {
                let tracked: Vec<(EntityClass, u32)> = detections
                    .iter()
                    .filter_map(|det| det.detection.track_id.map(|id| (det.class, id)))
                    .collect();
                let mut state = self.lock()?;
                let feed_state = state
                    .get_mut(feed)
                    .ok_or_else(|| anyhow!("unknown feed '{}'", feed))?;
                for (class, id) in tracked {
                    feed_state.seen[class.index()].insert(id);
                }
                for class in EntityClass::ALL {
                    let unique = feed_state.seen[class.index()].len() as u64;
                    feed_state.counts.set(class, unique);
                }
                Ok(feed_state.counts)
            }
        }
    }

    /// Sum of every feed's counts, taken atomically.
    pub fn snapshot(&self) -> Result<StatsSnapshot> {
        let state = self.lock()?;
        let mut sum = ClassCounts::default();
        for feed_state in state.values() {
            sum.add(&feed_state.counts);
        }
        Ok(sum.into())
    }

    /// One feed's counts, or `None` for an unknown feed.
    pub fn feed_snapshot(&self, feed: &str) -> Result<Option<StatsSnapshot>> {
        let state = self.lock()?;
        Ok(state.get(feed).map(|feed_state| feed_state.counts.into()))
    }

    /// Clear counts and identity sets of every feed.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock()?;
        for feed_state in state.values_mut() {
            feed_state.clear();
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, FeedState>>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("stats lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::detect::{BoundingBox, Detection};

    fn det(class_id: u32, track_id: Option<u32>) -> Detection {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), class_id, 0.8);
        match track_id {
            Some(id) => det.with_track_id(id),
            None => det,
        }
    }

    fn two_feeds(mode: CountingMode) -> StatsAggregator {
        StatsAggregator::new([("civilian", mode), ("soldier", mode)])
    }

    #[test]
    fn same_track_id_counts_once() -> Result<()> {
        let stats = two_feeds(CountingMode::Cumulative);
        for _ in 0..25 {
            stats.record("soldier", &classify(vec![det(1, Some(7))]))?;
        }
        let feed = stats.feed_snapshot("soldier")?.unwrap();
        assert_eq!(feed.soldier, 1);
        assert_eq!(feed.total, 1);
        Ok(())
    }

    #[test]
    fn cumulative_ignores_untracked_detections() -> Result<()> {
        let stats = two_feeds(CountingMode::Cumulative);
        let counts = stats.record(
            "civilian",
            &classify(vec![det(0, None), det(0, Some(3)), det(1, None)]),
        )?;
        assert_eq!(counts.get(EntityClass::Civilian), 1);
        assert_eq!(counts.get(EntityClass::Soldier), 0);
        Ok(())
    }

    #[test]
    fn cumulative_counts_are_per_class_and_monotonic() -> Result<()> {
        let stats = two_feeds(CountingMode::Cumulative);
        stats.record("civilian", &classify(vec![det(0, Some(1)), det(1, Some(1))]))?;
        stats.record("civilian", &classify(vec![det(0, Some(2))]))?;
        let counts = stats.record("civilian", &[])?;
        assert_eq!(counts.get(EntityClass::Civilian), 2);
        assert_eq!(counts.get(EntityClass::Soldier), 1);
        Ok(())
    }

    #[test]
    fn instantaneous_overwrites_with_latest_frame() -> Result<()> {
        let stats = two_feeds(CountingMode::Instantaneous);
        stats.record(
            "civilian",
            &classify(vec![det(0, None), det(0, None), det(1, None)]),
        )?;
        let counts = stats.record("civilian", &classify(vec![det(1, Some(4))]))?;
        assert_eq!(counts.get(EntityClass::Civilian), 0);
        assert_eq!(counts.get(EntityClass::Soldier), 1);
        assert_eq!(stats.record("civilian", &[])?.total(), 0);
        Ok(())
    }

    #[test]
    fn snapshot_sums_across_feeds() -> Result<()> {
        let stats = two_feeds(CountingMode::Instantaneous);
        stats.record(
            "civilian",
            &classify(vec![det(1, None), det(1, None), det(0, None)]),
        )?;
        stats.record(
            "soldier",
            &classify(vec![det(0, None), det(0, None), det(0, None)]),
        )?;
        assert_eq!(
            stats.snapshot()?,
            StatsSnapshot {
                soldier: 2,
                civilian: 4,
                total: 6
            }
        );
        Ok(())
    }

    #[test]
    fn mixed_modes_per_feed() -> Result<()> {
        let stats = StatsAggregator::new([
            ("civilian", CountingMode::Cumulative),
            ("soldier", CountingMode::Instantaneous),
        ]);
        stats.record("civilian", &classify(vec![det(0, Some(1))]))?;
        stats.record("civilian", &classify(vec![det(0, Some(2))]))?;
        stats.record("soldier", &classify(vec![det(1, None)]))?;
        stats.record("soldier", &classify(vec![det(1, None)]))?;
        let snapshot = stats.snapshot()?;
        assert_eq!((snapshot.civilian, snapshot.soldier, snapshot.total), (2, 1, 3));
        Ok(())
    }

    #[test]
    fn reset_is_idempotent_and_clears_identities() -> Result<()> {
        let stats = two_feeds(CountingMode::Cumulative);
        stats.record("soldier", &classify(vec![det(1, Some(9)), det(0, Some(2))]))?;
        stats.reset()?;
        assert_eq!(stats.snapshot()?, StatsSnapshot::default());
        stats.reset()?;
        assert_eq!(stats.snapshot()?, StatsSnapshot::default());

        // A previously seen id counts again after reset.
        stats.record("soldier", &classify(vec![det(1, Some(9))]))?;
        assert_eq!(stats.snapshot()?.soldier, 1);
        Ok(())
    }

    #[test]
    fn unrecognised_classes_never_reach_stats() -> Result<()> {
        let stats = two_feeds(CountingMode::Instantaneous);
        stats.record("civilian", &classify(vec![det(7, Some(1)), det(7, None)]))?;
        assert_eq!(stats.snapshot()?.total, 0);
        Ok(())
    }

    #[test]
    fn unknown_feed_is_rejected() {
        let stats = two_feeds(CountingMode::Cumulative);
        assert!(stats.record("tank", &[]).is_err());
        assert!(stats.feed_snapshot("tank").unwrap().is_none());
    }

    #[test]
    fn counting_mode_parses_case_insensitively() {
        assert_eq!(
            "Instantaneous".parse::<CountingMode>().unwrap(),
            CountingMode::Instantaneous
        );
        assert_eq!(
            " cumulative ".parse::<CountingMode>().unwrap(),
            CountingMode::Cumulative
        );
        assert!("running".parse::<CountingMode>().is_err());
    }
}
