//! Differential state reconciliation.
//!
//! The reconciler owns the authoritative entity tables. Each applied batch
//! produces a new immutable [`Snapshot`]; readers only ever hold published
//! snapshots, never the tables being mutated.

use crate::config::{ClassThresholds, TailConfig};
use crate::debounce::{DebounceVerdict, TombstoneDebounce};
use crate::error::TailResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tailfeed_protocol::{AntennaRecord, ChangeBatch, DiffSign, PerformanceClass, RawChangeRow};
use tracing::{debug, warn};

/// Current state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Entity key.
    pub key: String,
    /// Decoded attributes.
    pub attributes: AntennaRecord,
    /// Health bucket derived from the performance attribute.
    pub performance_class: PerformanceClass,
    /// Logical time of the row that set this state.
    pub last_update_timestamp: u64,
}

impl EntityState {
    /// Returns the performance attribute.
    pub fn performance(&self) -> f64 {
        self.attributes.performance
    }

    fn matches(&self, record: &AntennaRecord) -> bool {
        (self.attributes.performance - record.performance).abs() <= f64::EPSILON
    }
}

/// A helper entity together with its pending removal count.
#[derive(Debug, Clone, PartialEq)]
pub struct HelperEntityState {
    /// Entity state.
    pub entity: EntityState,
    /// Matching retractions seen since the last upsert.
    pub miss_count: u32,
}

/// An immutable view of both entity tables after one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Number of batches applied to produce this snapshot.
    pub version: u64,
    /// Progress timestamp of the latest applied batch.
    pub progress: Option<u64>,
    /// Primary entities by key.
    pub primary: BTreeMap<String, EntityState>,
    /// Helper entities by key.
    pub helpers: BTreeMap<String, HelperEntityState>,
}

impl Snapshot {
    /// Returns the primary entities in `class`.
    pub fn partition(&self, class: PerformanceClass) -> Vec<&EntityState> {
        self.primary
            .values()
            .filter(|entity| entity.performance_class == class)
            .collect()
    }

    /// Returns how many primary entities fall in each class.
    pub fn class_counts(&self) -> BTreeMap<PerformanceClass, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.primary.values() {
            *counts.entry(entity.performance_class).or_insert(0) += 1;
        }
        counts
    }

    /// Looks up an entity of either class.
    pub fn get(&self, key: &str) -> Option<&EntityState> {
        self.primary
            .get(key)
            .or_else(|| self.helpers.get(key).map(|helper| &helper.entity))
    }

    /// Returns true if `key` is present in either table.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the total number of entities.
    pub fn len(&self) -> usize {
        self.primary.len() + self.helpers.len()
    }

    /// Returns true if both tables are empty.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.helpers.is_empty()
    }

    /// Returns true if this snapshot reflects a later point of the tail
    /// than `other`: a higher progress timestamp, then a higher version.
    pub fn is_fresher_than(&self, other: &Snapshot) -> bool {
        (self.progress, self.version) > (other.progress, other.version)
    }
}

/// Shared read access to the latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotHandle {
    /// Creates a handle holding an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest published snapshot.
    pub fn load(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.read())
    }

    fn store(&self, snapshot: Arc<Snapshot>) {
        *self.inner.write() = snapshot;
    }
}

/// Counters kept by a [`StateReconciler`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Batches applied.
    pub batches_applied: u64,
    /// Batches skipped as replayed or out of order.
    pub batches_skipped: u64,
    /// Rows dropped because their payload could not be decoded.
    pub rows_dropped: u64,
    /// Retractions ignored because a newer value is stored.
    pub stale_retractions: u64,
    /// Helper entities evicted.
    pub helper_evictions: u64,
}

/// Applies change batches to the entity tables.
#[derive(Debug)]
pub struct StateReconciler {
    primary: BTreeMap<String, EntityState>,
    helpers: BTreeMap<String, HelperEntityState>,
    thresholds: ClassThresholds,
    debounce: TombstoneDebounce,
    version: u64,
    last_progress: Option<u64>,
    last_remainder: Option<ChangeBatch>,
    handle: SnapshotHandle,
    stats: ReconcileStats,
}

struct DecodedRow {
    key: String,
    record: AntennaRecord,
    sign: DiffSign,
    timestamp: u64,
}

impl StateReconciler {
    /// Creates a reconciler with empty tables and its own snapshot handle.
    pub fn new(config: &TailConfig) -> Self {
        Self {
            primary: BTreeMap::new(),
            helpers: BTreeMap::new(),
            thresholds: config.thresholds,
            debounce: TombstoneDebounce::new(config.helper_miss_threshold),
            version: 0,
            last_progress: None,
            last_remainder: None,
            handle: SnapshotHandle::new(),
            stats: ReconcileStats::default(),
        }
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.handle.load()
    }

    /// Returns the handle readers use to load snapshots.
    pub fn handle(&self) -> SnapshotHandle {
        self.handle.clone()
    }

    /// Returns the reconciliation counters.
    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Applies one batch and publishes the resulting snapshot.
    ///
    /// A batch whose progress timestamp is not past the last applied one
    /// has already been reflected and is skipped; `None` is returned and
    /// the published snapshot stays as it was. A remainder batch has no
    /// progress and is skipped when it equals the last applied remainder.
    pub fn apply(&mut self, batch: &ChangeBatch) -> Option<Arc<Snapshot>> {
        if self.already_applied(batch) {
            self.stats.batches_skipped += 1;
            return None;
        }

        let rows = self.decode(batch);
        let (helper_rows, primary_rows): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|row| row.record.helper);

        if !primary_rows.is_empty() {
            self.replace_primary(primary_rows);
        }
        for row in helper_rows {
            self.apply_helper(row);
        }

        self.version += 1;
        match batch.progress() {
            Some(progress) => self.last_progress = Some(progress),
            None => self.last_remainder = Some(batch.clone()),
        }
        self.stats.batches_applied += 1;

        let snapshot = Arc::new(Snapshot {
            version: self.version,
            progress: self.last_progress,
            primary: self.primary.clone(),
            helpers: self.helpers.clone(),
        });
        self.handle.store(Arc::clone(&snapshot));

        debug!(
            version = snapshot.version,
            primary = snapshot.primary.len(),
            helpers = snapshot.helpers.len(),
            "snapshot published"
        );
        Some(snapshot)
    }

    fn already_applied(&self, batch: &ChangeBatch) -> bool {
        match (batch.progress(), self.last_progress) {
            (Some(progress), Some(last)) if progress <= last => {
                debug!(progress, last, "skipping already applied batch");
                true
            }
            (Some(_), _) => false,
            (None, _) if self.last_remainder.as_ref() == Some(batch) => {
                debug!(rows = batch.len(), "skipping already applied remainder");
                true
            }
            (None, _) => false,
        }
    }

    fn decode_row(row: &RawChangeRow) -> TailResult<DecodedRow> {
        Ok(DecodedRow {
            key: row.entity_key.clone(),
            record: AntennaRecord::decode(&row.entity_key, &row.payload)?,
            sign: row.diff_sign,
            timestamp: row.logical_timestamp,
        })
    }

    fn decode(&mut self, batch: &ChangeBatch) -> Vec<DecodedRow> {
        let mut decoded = Vec::with_capacity(batch.len());
        for row in batch {
            match Self::decode_row(row) {
                Ok(row) => decoded.push(row),
                Err(e) => {
                    self.stats.rows_dropped += 1;
                    warn!(key = %row.entity_key, error = %e, "dropping undecodable row");
                }
            }
        }
        decoded
    }

    fn entity(&self, row: DecodedRow) -> EntityState {
        EntityState {
            performance_class: self.thresholds.classify(row.record.performance),
            key: row.key,
            attributes: row.record,
            last_update_timestamp: row.timestamp,
        }
    }

    // The upserts of the batch become the whole primary table. A retraction
    // older than the stored value belongs to a superseded value and does
    // not remove the entity.
    fn replace_primary(&mut self, rows: Vec<DecodedRow>) {
        let mut stale: HashMap<String, u64> = HashMap::new();
        let mut table = BTreeMap::new();

        for row in rows {
            match row.sign {
                DiffSign::Upsert => {
                    self.helpers.remove(&row.key);
                    let entity = self.entity(row);
                    table.insert(entity.key.clone(), entity);
                }
                DiffSign::Retract => {
                    stale.insert(row.key, row.timestamp);
                }
            }
        }

        for (key, entity) in std::mem::take(&mut self.primary) {
            if table.contains_key(&key) {
                continue;
            }
            match stale.get(&key) {
                Some(&timestamp) if timestamp < entity.last_update_timestamp => {
                    self.stats.stale_retractions += 1;
                    debug!(key = %key, timestamp, "ignoring stale retraction");
                    table.insert(key, entity);
                }
                _ => {}
            }
        }

        self.primary = table;
    }

    fn apply_helper(&mut self, row: DecodedRow) {
        match row.sign {
            DiffSign::Upsert => {
                self.primary.remove(&row.key);
                let mut miss_count = self
                    .helpers
                    .get(&row.key)
                    .map_or(0, |helper| helper.miss_count);
                self.debounce.reset(&mut miss_count);
                let entity = self.entity(row);
                self.helpers.insert(
                    entity.key.clone(),
                    HelperEntityState { entity, miss_count },
                );
            }
            DiffSign::Retract => {
                let Some(helper) = self.helpers.get_mut(&row.key) else {
                    return;
                };
                if row.timestamp < helper.entity.last_update_timestamp {
                    self.stats.stale_retractions += 1;
                    return;
                }
                if !helper.entity.matches(&row.record) {
                    return;
                }
                match self.debounce.record_miss(&mut helper.miss_count) {
                    DebounceVerdict::Retain { misses } => {
                        debug!(key = %row.key, misses, "helper miss recorded");
                    }
                    DebounceVerdict::Evict => {
                        self.helpers.remove(&row.key);
                        self.stats.helper_evictions += 1;
                        debug!(key = %row.key, "helper evicted");
                    }
                }
            }
        }
    }
}
