//! Process-local (L1) cache.
//!
//! Three maps behind one mutex: a plain key → coordinate map, the same keys
//! with an expiry, and memoized distances per (origin, address). Expiry is
//! checked lazily on read; there is no sweeper. Everything here can be
//! rebuilt from the lower tiers, so concurrent writers simply overwrite.

use super::address::{AddressKey, OriginKey};
use super::distance::Coordinate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Default lifetime of an L1/L2 entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What a tier remembers about an address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cached {
    Found(Coordinate),
    /// The address was tried and did not geocode.
    Negative,
}

impl Cached {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Cached::Found(coord) => Some(*coord),
            Cached::Negative => None,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct DistanceKey {
    pub origin: OriginKey,
    pub destination: AddressKey,
}

impl DistanceKey {
    pub fn new(origin: &OriginKey, destination: &AddressKey) -> Self {
        Self {
            origin: origin.clone(),
            destination: destination.clone(),
        }
    }
}

impl fmt::Display for DistanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.origin, self.destination)
    }
}

/// A memoized origin → address distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEntry {
    pub distance_km: f64,
    pub travel_time_minutes: u32,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, Copy)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct Maps {
    coord_by_key: HashMap<AddressKey, Cached>,
    coord_with_expiry: HashMap<AddressKey, Expiring<Cached>>,
    distance_by_origin_key: HashMap<DistanceKey, Expiring<DistanceEntry>>,
}

pub struct ProcessCache {
    ttl: Duration,
    maps: Mutex<Maps>,
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ProcessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            maps: Mutex::new(Maps::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks an address up, honouring the TTL. An expired entry is dropped
    /// from both coordinate maps and reported as a miss.
    pub fn get(&self, key: &AddressKey) -> Option<Cached> {
        let now = Instant::now();
        let mut maps = self.maps.lock();

        match maps.coord_with_expiry.get(key).copied() {
            Some(entry) if entry.is_expired(now) => {
                log::debug!("[L1] expired entry for \"{}\"", key);
                maps.coord_with_expiry.remove(key);
                maps.coord_by_key.remove(key);
                None
            }
            Some(entry) => Some(entry.value),
            None => maps.coord_by_key.get(key).copied(),
        }
    }

    /// Stores an entry in both coordinate maps with a fresh expiry.
    pub fn put(&self, key: &AddressKey, value: Cached) {
        let expires_at = Instant::now() + self.ttl;
        let mut maps = self.maps.lock();
        maps.coord_by_key.insert(key.clone(), value);
        maps.coord_with_expiry
            .insert(key.clone(), Expiring { value, expires_at });
    }

    /// Stores a coordinate with no expiry. Used for coordinates the
    /// authoritative store vouches for.
    pub fn pin(&self, key: &AddressKey, coord: Coordinate) {
        let mut maps = self.maps.lock();
        maps.coord_with_expiry.remove(key);
        maps.coord_by_key.insert(key.clone(), Cached::Found(coord));
    }

    pub fn get_distance(&self, key: &DistanceKey) -> Option<DistanceEntry> {
        let now = Instant::now();
        let mut maps = self.maps.lock();
        match maps.distance_by_origin_key.get(key).copied() {
            Some(entry) if entry.is_expired(now) => {
                maps.distance_by_origin_key.remove(key);
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }

    /// Memoizes a distance. It never outlives the coordinate it was computed from.
    pub fn put_distance(&self, key: DistanceKey, entry: DistanceEntry) {
        let now = Instant::now();
        let mut maps = self.maps.lock();
        let expires_at = maps
            .coord_with_expiry
            .get(&key.destination)
            .map(|coord| coord.expires_at)
            .unwrap_or(now + self.ttl);
        maps.distance_by_origin_key.insert(
            key,
            Expiring {
                value: entry,
                expires_at,
            },
        );
    }

    /// Number of addresses L1 knows about, expired or not.
    pub fn len(&self) -> usize {
        self.maps.lock().coord_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut maps = self.maps.lock();
        maps.coord_by_key.clear();
        maps.coord_with_expiry.clear();
        maps.distance_by_origin_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::geo::address::normalize;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn hanoi() -> Coordinate {
        Coordinate::new(21.0285, 105.8048)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_entries_younger_than_ttl() {
        let cache = ProcessCache::default();
        let key = normalize("Hoan Kiem");
        cache.put(&key, Cached::Found(hanoi()));

        tokio::time::advance(29 * DAY).await;
        assert_eq!(cache.get(&key), Some(Cached::Found(hanoi())));
    }

    #[tokio::test(start_paused = true)]
    async fn drops_entries_past_ttl_from_both_maps() {
        let cache = ProcessCache::default();
        let key = normalize("Hoan Kiem");
        cache.put(&key, Cached::Negative);

        tokio::time::advance(30 * DAY + Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pinned_entries_do_not_expire() {
        let cache = ProcessCache::default();
        let key = normalize("Garage 7");
        cache.pin(&key, hanoi());

        tokio::time::advance(365 * DAY).await;
        assert_eq!(cache.get(&key), Some(Cached::Found(hanoi())));
    }

    #[tokio::test(start_paused = true)]
    async fn distance_expires_with_its_coordinate() {
        let cache = ProcessCache::new(10 * DAY);
        let origin = OriginKey::from_coordinate(&Coordinate::new(21.0, 105.0));
        let dest = normalize("Garage 7");
        cache.put(&dest, Cached::Found(hanoi()));

        tokio::time::advance(5 * DAY).await;
        let key = DistanceKey::new(&origin, &dest);
        let entry = DistanceEntry {
            distance_km: 87.0,
            travel_time_minutes: 174,
            coordinate: hanoi(),
        };
        cache.put_distance(key.clone(), entry);
        assert_eq!(cache.get_distance(&key), Some(entry));

        tokio::time::advance(5 * DAY).await;
        assert_eq!(cache.get_distance(&key), None);
    }

    #[test]
    fn miss_is_none() {
        let cache = ProcessCache::default();
        assert_eq!(cache.get(&normalize("nowhere")), None);
        assert_eq!(Cached::Negative.coordinate(), None);
    }
}
