// =============================================================================
// Instrument lookup cache — LRU with TTL
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::money::Instrument;

struct Entry {
    instrument: Instrument,
    inserted_at: Instant,
}

/// Bounded instrument cache: `capacity` entries, each valid for `ttl`.
/// Recency is tracked with a simple deque of keys rather than a full
/// intrusive linked-hash-map, which is adequate at the default capacity of
/// 1000 entries.
pub struct InstrumentCache {
    entries: Mutex<HashMap<String, Entry>>,
    recency: Mutex<VecDeque<String>>,
    capacity: usize,
    ttl: Duration,
}

impl InstrumentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            recency: Mutex::new(VecDeque::new()),
            capacity,
            ttl,
        }
    }

    pub fn get(&self, contract_id: &str) -> Option<Instrument> {
        let mut entries = self.entries.lock();
        let hit = match entries.get(contract_id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.instrument.clone()),
            Some(_) => None,
            None => None,
        };
        if hit.is_none() {
            entries.remove(contract_id);
        } else {
            self.touch(contract_id);
        }
        hit
    }

    pub fn insert(&self, instrument: Instrument) {
        let key = instrument.contract_id.clone();
        {
            let mut entries = self.entries.lock();
            entries.insert(key.clone(), Entry { instrument, inserted_at: Instant::now() });
        }
        self.touch(&key);
        self.evict_if_over_capacity();
    }

    fn touch(&self, key: &str) {
        let mut recency = self.recency.lock();
        recency.retain(|k| k != key);
        recency.push_back(key.to_string());
    }

    fn evict_if_over_capacity(&self) {
        let mut entries = self.entries.lock();
        let mut recency = self.recency.lock();
        while entries.len() > self.capacity {
            if let Some(oldest) = recency.pop_front() {
                entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(id: &str) -> Instrument {
        Instrument::new(id, "ES", dec!(0.25), dec!(12.50), "America/New_York")
    }

    #[test]
    fn hits_before_ttl_expiry() {
        let cache = InstrumentCache::new(10, Duration::from_secs(60));
        cache.insert(sample("A"));
        assert!(cache.get("A").is_some());
    }

    #[test]
    fn misses_after_ttl_expiry() {
        let cache = InstrumentCache::new(10, Duration::from_millis(10));
        cache.insert(sample("A"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("A").is_none());
    }

    #[test]
    fn evicts_least_recently_used_over_capacity() {
        let cache = InstrumentCache::new(2, Duration::from_secs(60));
        cache.insert(sample("A"));
        cache.insert(sample("B"));
        cache.get("A"); // touch A, making B the LRU victim
        cache.insert(sample("C"));
        assert!(cache.get("B").is_none());
        assert!(cache.get("A").is_some());
        assert!(cache.get("C").is_some());
    }
}
