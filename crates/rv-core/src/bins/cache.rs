use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{BinAggregate, BinMeta};

pub const DEFAULT_TTL: Duration = Duration::from_secs(180);
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fingerprint of an aggregate's ordered key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregateId(u64);

impl AggregateId {
    pub fn of(agg: &BinAggregate) -> Self {
        let mut hasher = DefaultHasher::new();
        agg.len().hash(&mut hasher);
        for key in agg.keys() {
            key.hash(&mut hasher);
        }
        Self(hasher.finish())
    }
}

/// Expiring side table of per-aggregate [`BinMeta`].
///
/// Entries older than the TTL are treated as absent. When the table grows
/// past its capacity, expired entries are purged first, then the least
/// recently used ones.
#[derive(Debug)]
pub struct IntervalCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<AggregateId, (BinMeta, Instant)>>,
}

impl Default for IntervalCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl IntervalCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AggregateId, (BinMeta, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: AggregateId) -> Option<BinMeta> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get_mut(&id) {
            Some((meta, touched)) if now.duration_since(*touched) < self.ttl => {
                *touched = now;
                Some(*meta)
            }
            Some(_) => {
                entries.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Record `meta` under `new`, evicting the entry for `old`.
    pub fn store(&self, old: AggregateId, new: AggregateId, meta: BinMeta) {
        let mut entries = self.lock();
        if old != new {
            entries.remove(&old);
        }
        let now = Instant::now();
        entries.insert(new, (meta, now));
        if entries.len() > self.capacity {
            let ttl = self.ttl;
            entries.retain(|id, (_, touched)| *id == new || now.duration_since(*touched) < ttl);
        }
        while entries.len() > self.capacity {
            let Some(oldest) = entries
                .iter()
                .filter(|(id, _)| **id != new)
                .min_by_key(|(_, (_, touched))| *touched)
                .map(|(id, _)| *id)
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
