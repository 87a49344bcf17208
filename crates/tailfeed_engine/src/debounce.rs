//! Tombstone debounce for helper entities.

/// Outcome of recording one miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceVerdict {
    /// Keep the entity; `misses` matching retractions seen so far.
    Retain {
        /// Misses recorded, including this one.
        misses: u32,
    },
    /// The threshold was reached; evict the entity.
    Evict,
}

/// Evicts an entity only after `threshold` matching retractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TombstoneDebounce {
    threshold: u32,
}

impl TombstoneDebounce {
    /// Creates a policy evicting after `threshold` misses.
    ///
    /// A zero threshold behaves like one: the first miss evicts.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    /// Returns the eviction threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a miss against `miss_count`.
    pub fn record_miss(&self, miss_count: &mut u32) -> DebounceVerdict {
        *miss_count = miss_count.saturating_add(1);
        if *miss_count >= self.threshold {
            DebounceVerdict::Evict
        } else {
            DebounceVerdict::Retain {
                misses: *miss_count,
            }
        }
    }

    /// Clears the misses after a fresh upsert.
    pub fn reset(&self, miss_count: &mut u32) {
        *miss_count = 0;
    }
}

impl Default for TombstoneDebounce {
    fn default() -> Self {
        Self::new(3)
    }
}
