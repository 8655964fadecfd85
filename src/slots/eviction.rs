//! Generation-based bulk eviction.
//!
//! Every live slot carries the generation it was last written at. A sweep
//! evicts slots older than a threshold unless their tag is in a keep set,
//! in which case the slot is renewed to the current generation instead.

use std::hash::Hash;

use rustc_hash::FxHashSet;

use super::store::SlotStore;

/// Outcome of a generation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Slots tombstoned by the sweep.
    pub evicted: usize,
    /// Stale slots kept because their tag was in the keep set.
    pub refreshed: usize,
    /// `current - newest generation among evicted slots`, or `None` when
    /// nothing was evicted. Small values mean recently-written instances are
    /// already being dropped.
    pub staleness: Option<u32>,
}

impl SweepReport {
    /// Combine the reports of two independent sweeps at the same current
    /// generation.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let staleness = match (self.staleness, other.staleness) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            evicted: self.evicted + other.evicted,
            refreshed: self.refreshed + other.refreshed,
            staleness,
        }
    }
}

impl<K: Eq + Hash + Clone> SlotStore<K> {
    /// Evict every live slot whose generation is below `remove_below`,
    /// renewing those whose tag is in `keep` to `current` instead.
    ///
    /// Slots at or above the threshold are not touched.
    pub fn remove_generation(
        &mut self,
        remove_below: u32,
        current: u32,
        keep: &FxHashSet<K>,
    ) -> SweepReport {
        self.remove_generation_with(remove_below, current, keep, |_| {})
    }

    /// [`SlotStore::remove_generation`], calling `on_evict` with the index
    /// of every slot it tombstones.
    pub fn remove_generation_with(
        &mut self,
        remove_below: u32,
        current: u32,
        keep: &FxHashSet<K>,
        mut on_evict: impl FnMut(u32),
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut newest_evicted: Option<u32> = None;

        for index in 0..self.count() {
            let record = &mut self.records[index as usize];
            if !record.live || record.generation >= remove_below {
                continue;
            }
            if record.tag.as_ref().is_some_and(|tag| keep.contains(tag)) {
                record.generation = current;
                report.refreshed += 1;
                continue;
            }

            let generation = record.generation;
            if self.remove_at(index) {
                on_evict(index);
                report.evicted += 1;
                newest_evicted = Some(
                    newest_evicted.map_or(generation, |g| g.max(generation)),
                );
            }
        }

        report.staleness =
            newest_evicted.map(|generation| current.saturating_sub(generation));
        if report.evicted > 0 || report.refreshed > 0 {
            log::trace!(
                "generation sweep below {remove_below}: {} evicted, {} refreshed",
                report.evicted,
                report.refreshed
            );
        }
        report
    }
}
