//! Insertion-ordered key-value map with a per-table expiry timeout.
//!
//! Mirrors the array-backed `map_t` in `original_source/src/arp.c` and
//! `ip.c`: a handful of small tables (ARP resolver, ARP pending-send
//! queue, reassembly queue), each with its own timeout, scanned linearly
//! rather than hashed. A timeout of zero means entries never expire
//! (used for tables spec.md doesn't want time-bounded).

use alloc::vec::Vec;
use core::time::Duration;

struct Entry<K, V> {
    key: K,
    value: V,
    inserted_at: Duration,
}

/// A small map with lazy, per-entry expiry.
///
/// Expired entries are not swept on a timer; they are skipped by lookups
/// and physically dropped the next time a mutating operation runs. Every
/// method takes the caller's current time explicitly, via the [`crate::clock::Clock`]
/// the host supplies, so the map never reads a wall clock itself.
pub struct TimedMap<K, V> {
    entries: Vec<Entry<K, V>>,
    timeout: Duration,
}

impl<K: PartialEq, V> TimedMap<K, V> {
    /// Build an empty map. `timeout` of [`Duration::ZERO`] disables
    /// expiry entirely.
    pub fn new(timeout: Duration) -> Self {
        TimedMap {
            entries: Vec::new(),
            timeout,
        }
    }

    fn is_expired(&self, inserted_at: Duration, now: Duration) -> bool {
        self.timeout != Duration::ZERO && now.saturating_sub(inserted_at) >= self.timeout
    }

    /// Drop every entry that has expired as of `now`.
    pub fn purge_expired(&mut self, now: Duration) {
        let timeout = self.timeout;
        if timeout == Duration::ZERO {
            return;
        }
        self.entries
            .retain(|e| now.saturating_sub(e.inserted_at) < timeout);
    }

    /// Insert or replace the value for `key`, resetting its expiry clock.
    pub fn set(&mut self, key: K, value: V, now: Duration) {
        self.purge_expired(now);
        if let Some(e) = self.entries.iter_mut().find(|e| e.key == key) {
            e.value = value;
            e.inserted_at = now;
        } else {
            self.entries.push(Entry {
                key,
                value,
                inserted_at: now,
            });
        }
    }

    /// Remove `key`, returning its value if it was present and unexpired.
    pub fn delete(&mut self, key: &K, now: Duration) -> Option<V> {
        self.purge_expired(now);
        let pos = self.entries.iter().position(|e| &e.key == key)?;
        Some(self.entries.remove(pos).value)
    }

    /// True if the map currently has no unexpired entries.
    pub fn is_empty(&self, now: Duration) -> bool {
        !self
            .entries
            .iter()
            .any(|e| !self.is_expired(e.inserted_at, now))
    }

    /// Visit every unexpired entry in insertion order, per spec.md §3's
    /// `for_each(visitor(k, v, timestamp))`. Does not purge or mutate —
    /// expired entries are skipped rather than evicted, consistent with
    /// `get`'s read-only contract.
    pub fn for_each<F: FnMut(&K, &V, Duration)>(&self, now: Duration, mut visitor: F) {
        for e in self.entries.iter() {
            if !self.is_expired(e.inserted_at, now) {
                visitor(&e.key, &e.value, e.inserted_at);
            }
        }
    }
}

impl<K: PartialEq, V: Clone> TimedMap<K, V> {
    /// Look up `key`, returning a clone of its value if present and
    /// unexpired. Does not purge or mutate — safe to call from a
    /// read-only path.
    pub fn get(&self, key: &K, now: Duration) -> Option<V> {
        self.entries
            .iter()
            .find(|e| &e.key == key && !self.is_expired(e.inserted_at, now))
            .map(|e| e.value.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut map = TimedMap::new(Duration::from_secs(60));
        map.set("a", 1, Duration::from_secs(0));
        assert_eq!(map.get(&"a", Duration::from_secs(1)), Some(1));
    }

    #[test]
    fn entries_expire_after_timeout() {
        let mut map = TimedMap::new(Duration::from_secs(10));
        map.set("a", 1, Duration::from_secs(0));
        assert_eq!(map.get(&"a", Duration::from_secs(11)), None);
    }

    #[test]
    fn zero_timeout_never_expires() {
        let mut map = TimedMap::new(Duration::ZERO);
        map.set("a", 1, Duration::from_secs(0));
        assert_eq!(map.get(&"a", Duration::from_secs(1_000_000)), Some(1));
    }

    #[test]
    fn set_resets_expiry_clock() {
        let mut map = TimedMap::new(Duration::from_secs(10));
        map.set("a", 1, Duration::from_secs(0));
        map.set("a", 2, Duration::from_secs(9));
        assert_eq!(map.get(&"a", Duration::from_secs(15)), Some(2));
    }

    #[test]
    fn delete_removes_entry() {
        let mut map = TimedMap::new(Duration::from_secs(60));
        map.set("a", 1, Duration::from_secs(0));
        assert_eq!(map.delete(&"a", Duration::from_secs(1)), Some(1));
        assert_eq!(map.get(&"a", Duration::from_secs(1)), None);
    }

    #[test]
    fn for_each_visits_unexpired_entries_in_insertion_order() {
        let mut map = TimedMap::new(Duration::from_secs(10));
        map.set("a", 1, Duration::from_secs(0));
        map.set("b", 2, Duration::from_secs(1));
        map.set("c", 3, Duration::from_secs(2));

        let mut seen = alloc::vec::Vec::new();
        map.for_each(Duration::from_secs(3), |k, v, t| seen.push((*k, *v, t)));

        assert_eq!(
            seen,
            alloc::vec![
                ("a", 1, Duration::from_secs(0)),
                ("b", 2, Duration::from_secs(1)),
                ("c", 3, Duration::from_secs(2)),
            ]
        );
    }

    #[test]
    fn for_each_skips_expired_entries() {
        let mut map = TimedMap::new(Duration::from_secs(10));
        map.set("a", 1, Duration::from_secs(0));
        map.set("b", 2, Duration::from_secs(5));

        let mut seen = alloc::vec::Vec::new();
        map.for_each(Duration::from_secs(11), |k, v, _| seen.push((*k, *v)));

        assert_eq!(seen, alloc::vec![("b", 2)]);
    }
}
