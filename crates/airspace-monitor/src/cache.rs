//! Short-lived entity caches with age-based freshness.
//!
//! Caches are shared between the owning monitor task and the bounded-wait
//! getters on the handle, hence `DashMap` behind an `Arc`.

use airspace_core::{AircraftIcao, Callsign, FlightPlan, InformationMessage, MonitorSettings};
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Entries older than this are dropped by [`AirspaceCaches::prune`] even if never read.
const STALE_ENTRY_RETENTION: Duration = Duration::from_secs(3_600);
const MAX_ENTRIES_PER_CACHE: usize = 4_096;

pub trait CacheEntry {
    fn fetched_at(&self) -> Instant;
}

#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    pub fetched_at: Instant,
}

impl<V> CacheEntry for Cached<V> {
    fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

pub fn prune_cache<K, V>(cache: &DashMap<K, V>, max_entries: usize, max_age: Duration)
where
    K: Clone + Eq + Hash,
    V: CacheEntry,
{
    let now = Instant::now();
    let mut entries: Vec<(K, Instant)> = cache
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().fetched_at()))
        .collect();

    for (key, fetched_at) in &entries {
        if now.duration_since(*fetched_at) > max_age {
            cache.remove(key);
        }
    }

    if cache.len() <= max_entries {
        return;
    }

    entries.sort_by_key(|(_, fetched_at)| *fetched_at);
    for (key, _) in entries {
        if cache.len() <= max_entries {
            break;
        }
        cache.remove(&key);
    }
}

/// Result of a cache read: the value if any, and whether it is young enough to use.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<V> {
    pub value: Option<V>,
    pub fresh: bool,
}

impl<V> Lookup<V> {
    fn missing() -> Self {
        Self { value: None, fresh: false }
    }
}

/// Cache keyed by `K`; `max_age: None` means entries never go stale.
pub struct EntityCache<K, V> {
    entries: Arc<DashMap<K, Cached<V>>>,
    max_age: Option<Duration>,
}

impl<K, V> Clone for EntityCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            max_age: self.max_age,
        }
    }
}

impl<K: Eq + Hash, V> fmt::Debug for EntityCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("len", &self.entries.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl<K, V> EntityCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_age,
        }
    }

    pub fn get(&self, key: &K) -> Lookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::missing();
        };
        let fresh = match self.max_age {
            Some(max_age) => entry.fetched_at.elapsed() < max_age,
            None => true,
        };
        Lookup {
            value: Some(entry.value.clone()),
            fresh,
        }
    }

    /// Insert or overwrite, stamping the entry with the current time.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Cached {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Remove and return the value, for one-shot consumption.
    pub fn take(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, cached)| cached.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prune(&self, max_entries: usize, max_age: Duration) {
        prune_cache(&self.entries, max_entries, max_age);
    }
}

/// ICAO-by-callsign, flight-plan-by-callsign and METAR-by-airport caches.
#[derive(Debug, Clone)]
pub struct AirspaceCaches {
    pub icao: EntityCache<Callsign, AircraftIcao>,
    pub flight_plans: EntityCache<Callsign, FlightPlan>,
    pub metars: EntityCache<String, InformationMessage>,
}

impl AirspaceCaches {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            icao: EntityCache::new(None),
            flight_plans: EntityCache::new(Some(settings.flight_plan_max_age())),
            metars: EntityCache::new(Some(settings.metar_max_age())),
        }
    }

    /// Drop everything cached for an aircraft callsign.
    pub fn invalidate_aircraft(&self, callsign: &Callsign) {
        self.icao.invalidate(callsign);
        self.flight_plans.invalidate(callsign);
    }

    pub fn clear(&self) {
        self.icao.clear();
        self.flight_plans.clear();
        self.metars.clear();
    }

    pub fn prune(&self) {
        self.icao.prune(MAX_ENTRIES_PER_CACHE, STALE_ENTRY_RETENTION);
        self.flight_plans.prune(MAX_ENTRIES_PER_CACHE, STALE_ENTRY_RETENTION);
        self.metars.prune(MAX_ENTRIES_PER_CACHE, STALE_ENTRY_RETENTION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_go_stale_after_max_age() {
        let cache: EntityCache<String, String> = EntityCache::new(Some(Duration::from_secs(10)));
        cache.insert("KLBB".to_string(), "KLBB 241753Z".to_string());

        let lookup = cache.get(&"KLBB".to_string());
        assert!(lookup.fresh);
        assert_eq!(lookup.value.as_deref(), Some("KLBB 241753Z"));

        tokio::time::advance(Duration::from_secs(11)).await;
        let lookup = cache.get(&"KLBB".to_string());
        assert!(!lookup.fresh);
        assert!(lookup.value.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_without_max_age_stay_fresh() {
        let cache: EntityCache<String, u32> = EntityCache::new(None);
        cache.insert("DLH123".to_string(), 1);
        tokio::time::advance(Duration::from_secs(3_000)).await;
        assert!(cache.get(&"DLH123".to_string()).fresh);
    }

    #[test]
    fn missing_entries_are_not_fresh() {
        let cache: EntityCache<String, u32> = EntityCache::new(None);
        assert_eq!(cache.get(&"X".to_string()), Lookup { value: None, fresh: false });
    }

    #[test]
    fn take_consumes_the_entry() {
        let cache: EntityCache<String, u32> = EntityCache::new(None);
        cache.insert("A".to_string(), 7);
        assert_eq!(cache.take(&"A".to_string()), Some(7));
        assert!(!cache.contains(&"A".to_string()));
        assert!(!cache.invalidate(&"A".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_oldest_beyond_capacity() {
        let cache: EntityCache<u32, u32> = EntityCache::new(None);
        for key in 0..5 {
            cache.insert(key, key);
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        cache.prune(3, Duration::from_secs(60));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&0));
        assert!(!cache.contains(&1));
        assert!(cache.contains(&4));
    }

    #[test]
    fn debug_output_reports_size_not_entries() {
        let caches = AirspaceCaches::new(&MonitorSettings::default());
        caches.metars.insert("KLBB".to_string(), InformationMessage::metar("KLBB 241753Z"));
        let debug = format!("{:?}", caches);
        assert!(debug.contains("len: 1"));
        assert!(!debug.contains("KLBB"));
    }

    #[test]
    fn invalidate_aircraft_removes_icao_and_flight_plan() {
        let caches = AirspaceCaches::new(&MonitorSettings::default());
        let callsign = Callsign::new("AFR11FW");
        caches.icao.insert(callsign.clone(), AircraftIcao::new("A320", "L2J", "AFR"));
        caches.flight_plans.insert(callsign.clone(), FlightPlan::default());

        caches.invalidate_aircraft(&callsign);
        assert!(!caches.icao.contains(&callsign));
        assert!(!caches.flight_plans.contains(&callsign));
    }
}
