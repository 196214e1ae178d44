#![allow(dead_code)]

use async_trait::async_trait;
use garage_geo::sdk::geo::cache::Cached;
use garage_geo::sdk::geo::distributed::{decode_value, encode_value, DistributedCache};
use garage_geo::sdk::geo::provider::GeocodingProvider;
use garage_geo::sdk::geo::store::CoordinateStore;
use garage_geo::{normalize, AddressKey, Coordinate, EntityId, GeoError, Resolver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const KM_PER_DEGREE_LAT: f64 = 6371.0 * std::f64::consts::PI / 180.0;

pub fn hanoi() -> Coordinate {
    Coordinate::new(21.0285, 105.8048)
}

/// A point `km` due north of `origin`.
pub fn north_of(origin: Coordinate, km: f64) -> Coordinate {
    Coordinate::new(origin.lat + km / KM_PER_DEGREE_LAT, origin.lng)
}

#[derive(Default)]
pub struct FakeCache {
    /// Raw stored values, encoded the way Redis holds them.
    entries: Mutex<HashMap<AddressKey, (String, Instant)>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub failing: bool,
}

impl FakeCache {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn preload(&self, address: &str, coord: Coordinate, ttl: Duration) {
        let raw = encode_value(&coord).unwrap();
        self.entries
            .lock()
            .insert(normalize(address), (raw, Instant::now() + ttl));
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.lock().contains_key(&normalize(address))
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedCache for FakeCache {
    async fn get(&self, key: &AddressKey) -> Result<Option<Cached>, GeoError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(GeoError::Timeout(Duration::from_millis(50)));
        }
        let entries = self.entries.lock();
        match entries.get(key) {
            Some((raw, expires_at)) if Instant::now() < *expires_at => decode_value(raw).map(Some),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &AddressKey, coord: Coordinate, ttl: Duration) -> Result<(), GeoError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(GeoError::Timeout(Duration::from_millis(50)));
        }
        let raw = encode_value(&coord)?;
        self.entries
            .lock()
            .insert(key.clone(), (raw, Instant::now() + ttl));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<HashMap<EntityId, Coordinate>>,
    pub batch_calls: AtomicUsize,
    pub requested: Mutex<Vec<Vec<EntityId>>>,
    pub updates: Mutex<Vec<(EntityId, Coordinate)>>,
    /// Updates never complete.
    pub hanging: bool,
}

impl FakeStore {
    pub fn with_rows(rows: &[(i64, Coordinate)]) -> Self {
        let store = Self::default();
        store
            .rows
            .lock()
            .extend(rows.iter().map(|(id, coord)| (EntityId(*id), *coord)));
        store
    }

    pub fn hanging(mut self) -> Self {
        self.hanging = true;
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinateStore for FakeStore {
    async fn batch_get_coordinates(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Coordinate>, GeoError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(ids.to_vec());
        let rows = self.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|coord| (*id, *coord)))
            .collect())
    }

    async fn update_coordinate(&self, id: EntityId, coord: Coordinate) -> Result<(), GeoError> {
        self.updates.lock().push((id, coord));
        if self.hanging {
            std::future::pending::<()>().await;
        }
        self.rows.lock().insert(id, coord);
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub enum Answer {
    Found(Coordinate),
    NoResult,
    Fail,
    Slow(Duration, Coordinate),
}

#[derive(Default)]
pub struct FakeProvider {
    answers: Mutex<HashMap<String, Answer>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// How long `ready` holds each call, like a rate limiter with no free slot.
    ready_delay: Option<Duration>,
}

impl FakeProvider {
    pub fn answer(self, address: &str, answer: Answer) -> Self {
        self.answers
            .lock()
            .insert(address.trim().to_lowercase(), answer);
        self
    }

    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, address: &str) -> usize {
        let wanted = address.trim().to_lowercase();
        self.calls
            .lock()
            .iter()
            .filter(|a| a.to_lowercase() == wanted)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodingProvider for FakeProvider {
    async fn ready(&self) {
        if let Some(delay) = self.ready_delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeoError> {
        self.calls.lock().push(address.to_string());
        let answer = self.answers.lock().get(&address.to_lowercase()).copied();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = match answer {
            Some(Answer::Found(coord)) => Ok(Some(coord)),
            Some(Answer::Slow(delay, coord)) => {
                tokio::time::sleep(delay).await;
                Ok(Some(coord))
            }
            Some(Answer::Fail) => Err(GeoError::RawApi {
                status: 503,
                body: "upstream unavailable".to_string(),
            }),
            Some(Answer::NoResult) | None => Ok(None),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct Harness {
    pub resolver: Resolver,
    pub cache: Arc<FakeCache>,
    pub store: Arc<FakeStore>,
    pub provider: Arc<FakeProvider>,
}

pub fn harness(cache: FakeCache, store: FakeStore, provider: FakeProvider) -> Harness {
    harness_with(cache, store, provider, |builder| builder)
}

pub fn harness_with(
    cache: FakeCache,
    store: FakeStore,
    provider: FakeProvider,
    configure: impl FnOnce(garage_geo::ResolverBuilder) -> garage_geo::ResolverBuilder,
) -> Harness {
    let cache = Arc::new(cache);
    let store = Arc::new(store);
    let provider = Arc::new(provider);
    let builder = Resolver::builder(provider.clone())
        .distributed(cache.clone())
        .store(store.clone());
    Harness {
        resolver: configure(builder).build(),
        cache,
        store,
        provider,
    }
}
