//! Write-through, expiry-aware inventory cache.
//!
//! Inventory membership checks and "what's missing" diffs happen on every
//! peer inventory exchange, so they are served from an in-memory per-stream
//! index instead of hitting SQLite per object. The durable `objects` table
//! remains the source of truth: writes land there first and the index is
//! updated after, so the index can lag behind the store but never run ahead
//! of it.
//!
//! Each stream's index moves Cold -> Warming -> Warm. Warming is lazy, on
//! first access, and guarded by a single-flight lock so exactly one thread
//! populates while concurrent callers for the same stream wait. A warm map,
//! once created, is only ever mutated, never replaced, so clones of the
//! `Arc` handed out earlier stay valid.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::database::Database;
use crate::error::Result;
use crate::models::{InventoryVector, NetworkObject};

/// How long an expired object is kept around before `cleanup` deletes it.
/// Peers with slightly skewed clocks may still legitimately offer it.
const EXPIRY_GRACE_MINUTES: i64 = 5;

/// Per-stream index of vector -> expiry.
type StreamIndex = DashMap<InventoryVector, DateTime<Utc>>;

/// In-memory overlay on the durable object inventory.
pub struct Inventory {
    db: Arc<Mutex<Database>>,
    /// Warm per-stream indexes. Absence means the stream is cold.
    streams: DashMap<u32, Arc<StreamIndex>>,
    /// Single-flight guard for the Cold -> Warm transition.
    warm_lock: Mutex<()>,
}

impl Inventory {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            db,
            streams: DashMap::new(),
            warm_lock: Mutex::new(()),
        }
    }

    /// All non-expired vectors we hold, unioned across the given streams.
    pub fn inventory(&self, streams: &[u32]) -> Result<HashSet<InventoryVector>> {
        let now = Utc::now();
        let mut result = HashSet::new();

        for &stream in streams {
            let index = self.warm(stream)?;
            for entry in index.iter() {
                if *entry.value() > now {
                    result.insert(*entry.key());
                }
            }
        }
        Ok(result)
    }

    /// The subset of `candidates` we do not hold in any of the given streams.
    ///
    /// This is the diff peers act on when deciding what to request, so it is
    /// computed purely against warm indexes.
    pub fn missing(
        &self,
        candidates: &HashSet<InventoryVector>,
        streams: &[u32],
    ) -> Result<HashSet<InventoryVector>> {
        let mut missing = candidates.clone();
        for &stream in streams {
            let index = self.warm(stream)?;
            missing.retain(|vector| !index.contains_key(vector));
            if missing.is_empty() {
                break;
            }
        }
        Ok(missing)
    }

    /// Whether we hold the object with this vector in the given stream.
    pub fn contains(&self, vector: InventoryVector, stream: u32) -> Result<bool> {
        Ok(self.warm(stream)?.contains_key(&vector))
    }

    /// Persist an object and admit it to the warm index.
    ///
    /// Returns `false` for duplicates. The durable write happens before the
    /// index update: if we crash in between, the stream merely re-warms from
    /// storage on the next read, whereas the reverse order could leave the
    /// index claiming an object the store never got.
    pub fn store(&self, object: &NetworkObject) -> Result<bool> {
        let index = self.warm(object.stream)?;

        if index.contains_key(&object.vector) {
            tracing::debug!(vector = %object.vector, "duplicate object offered, skipping");
            return Ok(false);
        }

        let inserted = self.db.lock().insert_object(object)?;
        index.insert(object.vector, object.expires_at);
        Ok(inserted)
    }

    /// Drop objects whose expiry passed more than the grace window ago, from
    /// the durable store first and then from every warm index.
    ///
    /// Performs a full table scan equivalent; run it on a timer, not per
    /// operation. Returns the number of objects deleted from storage.
    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::minutes(EXPIRY_GRACE_MINUTES);
        let removed = self.db.lock().delete_expired_objects(cutoff)?;

        for entry in self.streams.iter() {
            entry.value().retain(|_, expires_at| *expires_at >= cutoff);
        }

        Ok(removed)
    }

    /// Get the warm index for a stream, populating it from storage if this is
    /// the first access.
    fn warm(&self, stream: u32) -> Result<Arc<StreamIndex>> {
        if let Some(index) = self.streams.get(&stream) {
            return Ok(Arc::clone(&index));
        }

        let _guard = self.warm_lock.lock();

        // Another caller may have warmed the stream while we waited.
        if let Some(index) = self.streams.get(&stream) {
            return Ok(Arc::clone(&index));
        }

        tracing::debug!(stream, "warming inventory index");
        let entries = self.db.lock().stream_inventory(stream)?;

        let index: StreamIndex = entries.into_iter().collect();
        let index = Arc::new(index);
        self.streams.insert(stream, Arc::clone(&index));
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectKind;

    fn test_inventory() -> Inventory {
        let db = Database::open_in_memory().unwrap();
        Inventory::new(Arc::new(Mutex::new(db)))
    }

    fn test_object(byte: u8, stream: u32, ttl_minutes: i64) -> NetworkObject {
        NetworkObject {
            vector: InventoryVector::new([byte; 32]),
            stream,
            expires_at: Utc::now() + Duration::minutes(ttl_minutes),
            version: 3,
            kind: ObjectKind::Msg,
            payload: vec![byte],
        }
    }

    #[test]
    fn store_is_idempotent() {
        let inv = test_inventory();
        let obj = test_object(1, 1, 60);

        assert!(inv.store(&obj).unwrap());
        assert!(!inv.store(&obj).unwrap());

        let vectors = inv.inventory(&[1]).unwrap();
        assert_eq!(vectors.len(), 1);
        assert!(vectors.contains(&obj.vector));
    }

    #[test]
    fn cache_agrees_with_store_after_warm() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));

        // Objects written behind the cache's back, before first access.
        let a = test_object(1, 1, 60);
        let b = test_object(2, 1, 60);
        {
            let db = db.lock();
            db.insert_object(&a).unwrap();
            db.insert_object(&b).unwrap();
        }

        let inv = Inventory::new(Arc::clone(&db));
        let cached = inv.inventory(&[1]).unwrap();

        let direct: HashSet<_> = db
            .lock()
            .stream_inventory(1)
            .unwrap()
            .into_iter()
            .map(|(v, _)| v)
            .collect();

        assert_eq!(cached, direct);
    }

    #[test]
    fn expired_objects_hidden_but_not_deleted_until_cleanup() {
        let inv = test_inventory();
        let stale = test_object(3, 1, -30);
        inv.store(&stale).unwrap();

        // Hidden from inventory listings right away.
        assert!(inv.inventory(&[1]).unwrap().is_empty());
        // But physically present, and still counted as possessed.
        assert!(inv.contains(stale.vector, 1).unwrap());
        assert!(inv.db.lock().object(stale.vector).unwrap().is_some());

        let removed = inv.cleanup(Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert!(!inv.contains(stale.vector, 1).unwrap());
        assert!(inv.db.lock().object(stale.vector).unwrap().is_none());
    }

    #[test]
    fn cleanup_honors_grace_window() {
        let inv = test_inventory();
        // Expired two minutes ago: inside the five-minute grace window.
        let recent = test_object(4, 1, -2);
        inv.store(&recent).unwrap();

        assert_eq!(inv.cleanup(Utc::now()).unwrap(), 0);
        assert!(inv.contains(recent.vector, 1).unwrap());
    }

    #[test]
    fn missing_diffs_against_all_given_streams() {
        let inv = test_inventory();
        let held_s1 = test_object(5, 1, 60);
        let held_s2 = test_object(6, 2, 60);
        inv.store(&held_s1).unwrap();
        inv.store(&held_s2).unwrap();

        let unknown = InventoryVector::new([7; 32]);
        let candidates: HashSet<_> =
            [held_s1.vector, held_s2.vector, unknown].into_iter().collect();

        let missing = inv.missing(&candidates, &[1, 2]).unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing.contains(&unknown));

        // Narrower stream set: stream 2 possessions no longer count.
        let missing = inv.missing(&candidates, &[1]).unwrap();
        assert!(missing.contains(&held_s2.vector));
        assert!(missing.contains(&unknown));
        assert!(!missing.contains(&held_s1.vector));
    }

    #[test]
    fn streams_are_partitioned() {
        let inv = test_inventory();
        let obj = test_object(8, 1, 60);
        inv.store(&obj).unwrap();

        assert!(inv.contains(obj.vector, 1).unwrap());
        assert!(!inv.contains(obj.vector, 2).unwrap());
        assert!(inv.inventory(&[2]).unwrap().is_empty());
    }

    #[test]
    fn concurrent_warm_and_store() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        for i in 0..16 {
            db.lock().insert_object(&test_object(i, 1, 60)).unwrap();
        }

        let inv = Arc::new(Inventory::new(db));
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let inv = Arc::clone(&inv);
            handles.push(std::thread::spawn(move || {
                let obj = test_object(100 + t, 1, 60);
                inv.store(&obj).unwrap();
                inv.inventory(&[1]).unwrap().len()
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap() >= 16);
        }
        assert_eq!(inv.inventory(&[1]).unwrap().len(), 20);
    }
}
