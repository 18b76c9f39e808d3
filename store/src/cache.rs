use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use telemetry::StoredRecord;

/// Result of offering a record to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    /// The cached record is at least as recent; nothing changed.
    Stale,
}

/// Latest known state per drone.
///
/// Entries are only ever replaced by a record with a strictly newer
/// `received_at`, so reordered deliveries cannot roll a drone's state back.
/// Writers for different drones contend only when their ids share a shard.
#[derive(Debug, Default)]
pub struct LatestStateCache {
    entries: DashMap<String, StoredRecord>,
}

impl LatestStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: StoredRecord) -> PutOutcome {
        match self.entries.entry(record.emitter_id().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                PutOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                if record.received_at > slot.get().received_at {
                    slot.insert(record);
                    PutOutcome::Replaced
                } else {
                    PutOutcome::Stale
                }
            }
        }
    }

    pub fn get(&self, emitter_id: &str) -> Option<StoredRecord> {
        self.entries.get(emitter_id).map(|entry| entry.value().clone())
    }

    /// The `n` most recently updated drones, newest first
    pub fn list_recent(&self, n: usize) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();

        records.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.emitter_id().cmp(b.emitter_id()))
        });
        records.truncate(n);
        records
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
