//! `Arc<Mutex<HashMap<...>>>` TTL cache guarding only the map — the same
//! shared-state idiom the store traits use, never held across an await.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: Option<V>,
    expires_at: Instant,
}

pub enum CacheHit<V> {
    Positive(V),
    Negative,
}

pub struct Cache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> Cache<K, V> {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            positive_ttl,
            negative_ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<CacheHit<V>> {
        let entries = self.entries.lock().expect("enrichment cache poisoned");
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(match &entry.value {
            Some(v) => CacheHit::Positive(v.clone()),
            None => CacheHit::Negative,
        })
    }

    pub fn put_positive(&self, key: K, value: V) {
        let mut entries = self.entries.lock().expect("enrichment cache poisoned");
        entries.insert(
            key,
            Entry {
                value: Some(value),
                expires_at: Instant::now() + self.positive_ttl,
            },
        );
    }

    pub fn put_negative(&self, key: K) {
        let mut entries = self.entries.lock().expect("enrichment cache poisoned");
        entries.insert(
            key,
            Entry {
                value: None,
                expires_at: Instant::now() + self.negative_ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_entry_is_returned_until_expiry() {
        let cache: Cache<String, u32> = Cache::new(Duration::from_secs(60), Duration::from_secs(5));
        cache.put_positive("a".to_string(), 7);
        match cache.get(&"a".to_string()) {
            Some(CacheHit::Positive(v)) => assert_eq!(v, 7),
            _ => panic!("expected positive hit"),
        }
    }

    #[test]
    fn negative_entry_is_distinguishable_from_miss() {
        let cache: Cache<String, u32> = Cache::new(Duration::from_secs(60), Duration::from_secs(5));
        cache.put_negative("b".to_string());
        assert!(matches!(cache.get(&"b".to_string()), Some(CacheHit::Negative)));
        assert!(cache.get(&"c".to_string()).is_none());
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache: Cache<String, u32> = Cache::new(Duration::from_millis(1), Duration::from_millis(1));
        cache.put_positive("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(&"a".to_string()).is_none());
    }
}
