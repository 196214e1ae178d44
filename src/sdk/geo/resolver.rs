//! Tiered address → distance resolution.
//!
//! Lookups fall through process memory (L1), the distributed cache (L2),
//! the authoritative store (L3) and finally the geocoding provider (L4).
//! Anything a lower tier finds is written back up: L1 synchronously, L2 and
//! L3 through the background [`WriteBackQueue`]. Nothing below the resolver
//! can fail a call; an address that cannot be resolved comes back as a
//! zero-distance record with a non-`Resolved` status.

use super::address::{normalize, validate_address, AddressKey, OriginKey};
use super::cache::{Cached, DistanceEntry, DistanceKey, ProcessCache, DEFAULT_TTL};
use super::distance::{format_distance, travel_time_minutes, Coordinate};
use super::distributed::{DistributedCache, NoOpCache, RedisCache};
use super::error::{GeoError, ResolveError};
use super::provider::{GeocodingProvider, RemoteGeocoder};
use super::store::{CoordinateStore, EntityId, NoOpStore, PgCoordinateStore};
use super::writeback::{WriteBack, WriteBackQueue, DEFAULT_QUEUE_SIZE};
use crate::sdk::config::ResolverConfig;
use crate::sdk::util::rate_limit::geocode_limiter;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TIER_TIMEOUT: Duration = Duration::from_secs(2);

/// One address to resolve, optionally tied to a known entity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
}

impl BatchItem {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            entity_id: None,
        }
    }

    pub fn for_entity(address: impl Into<String>, id: EntityId) -> Self {
        Self {
            address: address.into(),
            entity_id: Some(id),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Resolved,
    /// Tried, and no tier could place the address. Includes provider errors.
    NotFound,
    /// The address was blank.
    Empty,
    Invalid,
    /// The batch deadline fired before this item finished.
    TimedOut,
}

/// The tier that answered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Process,
    Distributed,
    Store,
    Provider,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistanceRecord {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    pub distance_km: f64,
    pub travel_time_minutes: u32,
    pub coordinate: Coordinate,
    pub status: ResolutionStatus,
    pub source: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DistanceRecord {
    /// Zero distance, zero coordinate.
    fn sentinel(item: &BatchItem, status: ResolutionStatus, source: Option<Tier>) -> Self {
        Self {
            address: item.address.clone(),
            entity_id: item.entity_id,
            distance_km: 0.0,
            travel_time_minutes: 0,
            coordinate: Coordinate::SENTINEL,
            status,
            source,
            error: None,
        }
    }

    fn invalid(item: &BatchItem, err: ResolveError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::sentinel(item, ResolutionStatus::Invalid, None)
        }
    }

    fn from_entry(item: &BatchItem, entry: DistanceEntry, source: Tier) -> Self {
        Self {
            address: item.address.clone(),
            entity_id: item.entity_id,
            distance_km: entry.distance_km,
            travel_time_minutes: entry.travel_time_minutes,
            coordinate: entry.coordinate,
            status: ResolutionStatus::Resolved,
            source: Some(source),
            error: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }

    pub fn display_distance(&self) -> String {
        format_distance(self.distance_km)
    }
}

#[derive(Default)]
pub struct ResolverStats {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    negative_hits: AtomicU64,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub negative_hits: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub dropped_writebacks: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Origin {
    coord: Coordinate,
    key: OriginKey,
}

pub struct ResolverBuilder {
    provider: Arc<dyn GeocodingProvider>,
    distributed: Arc<dyn DistributedCache>,
    store: Arc<dyn CoordinateStore>,
    ttl: Duration,
    concurrency: usize,
    provider_timeout: Duration,
    tier_timeout: Duration,
    queue_size: usize,
}

impl ResolverBuilder {
    pub fn new(provider: Arc<dyn GeocodingProvider>) -> Self {
        Self {
            provider,
            distributed: Arc::new(NoOpCache),
            store: Arc::new(NoOpStore),
            ttl: DEFAULT_TTL,
            concurrency: DEFAULT_CONCURRENCY,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            tier_timeout: DEFAULT_TIER_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    pub fn distributed(mut self, distributed: Arc<dyn DistributedCache>) -> Self {
        self.distributed = distributed;
        self
    }

    pub fn store(mut self, store: Arc<dyn CoordinateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Width of the L2 and L4 fan-out. Clamped to at least one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Timeout for a single L2 or L3 round trip.
    pub fn tier_timeout(mut self, timeout: Duration) -> Self {
        self.tier_timeout = timeout;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Must be called inside a Tokio runtime: it spawns the write-back workers.
    /// Background writes share `tier_timeout` with the read path.
    pub fn build(self) -> Resolver {
        let writeback = WriteBackQueue::spawn(
            self.queue_size,
            self.tier_timeout,
            self.distributed.clone(),
            self.store.clone(),
        );
        Resolver {
            l1: ProcessCache::new(self.ttl),
            distributed: self.distributed,
            store: self.store,
            provider: self.provider,
            writeback,
            concurrency: self.concurrency,
            provider_timeout: self.provider_timeout,
            tier_timeout: self.tier_timeout,
            stats: ResolverStats::default(),
        }
    }
}

pub struct Resolver {
    l1: ProcessCache,
    distributed: Arc<dyn DistributedCache>,
    store: Arc<dyn CoordinateStore>,
    provider: Arc<dyn GeocodingProvider>,
    writeback: WriteBackQueue,
    concurrency: usize,
    provider_timeout: Duration,
    tier_timeout: Duration,
    stats: ResolverStats,
}

impl Resolver {
    pub fn builder(provider: Arc<dyn GeocodingProvider>) -> ResolverBuilder {
        ResolverBuilder::new(provider)
    }

    /// Wires the remote provider and whichever of Redis and Postgres are
    /// configured. An unreachable Redis or Postgres degrades to its no-op
    /// tier with a warning, and neither may hold startup past `tier_timeout`.
    pub async fn from_config(config: &ResolverConfig) -> Result<Self, GeoError> {
        let provider = RemoteGeocoder::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.provider_timeout,
            geocode_limiter(config.rate_per_minute),
        )?;

        let distributed: Arc<dyn DistributedCache> = match &config.redis_url {
            Some(url) => {
                match connect_within("L2", config.tier_timeout, RedisCache::connect(url)).await {
                    Some(cache) => Arc::new(cache),
                    None => Arc::new(NoOpCache),
                }
            }
            None => Arc::new(NoOpCache),
        };

        let store: Arc<dyn CoordinateStore> = match &config.database_url {
            Some(url) => {
                let connect = PgCoordinateStore::connect(url, config.tier_timeout);
                match connect_within("L3", config.tier_timeout, connect).await {
                    Some(store) => Arc::new(store),
                    None => Arc::new(NoOpStore),
                }
            }
            None => Arc::new(NoOpStore),
        };

        Ok(Self::builder(Arc::new(provider))
            .distributed(distributed)
            .store(store)
            .ttl(config.ttl)
            .concurrency(config.concurrency)
            .provider_timeout(config.provider_timeout)
            .tier_timeout(config.tier_timeout)
            .queue_size(config.queue_size)
            .build())
    }

    /// Resolves one item, checking L1, L2, L3 and L4 in that order.
    pub async fn resolve(
        &self,
        origin: Coordinate,
        item: &BatchItem,
    ) -> Result<DistanceRecord, ResolveError> {
        let origin = checked_origin(origin)?;
        validate_address(&item.address)?;

        let key = normalize(&item.address);
        if key.is_empty() {
            return Ok(DistanceRecord::sentinel(item, ResolutionStatus::Empty, None));
        }
        if let Some(record) = self.resolve_from_process(&origin, &key, item) {
            return Ok(record);
        }
        if let Some(cached) = self.lookup_distributed(&key).await {
            self.l1.put(&key, cached);
            return Ok(self.record_for(item, &origin, &key, cached, Tier::Distributed));
        }
        if let Some(id) = item.entity_id {
            if let Some(coord) = self.lookup_store(&[id]).await.get(&id) {
                return Ok(self.accept_store(item, &origin, &key, *coord));
            }
        }

        let outcome = self.call_provider(item.address.trim()).await;
        let entity_ids: Vec<EntityId> = item.entity_id.into_iter().collect();
        let cached = self.accept_provider(&key, outcome, &entity_ids);
        Ok(self.record_for(item, &origin, &key, cached, Tier::Provider))
    }

    /// Resolves a batch and returns it sorted by ascending distance.
    ///
    /// Fails only for an invalid origin. Every item gets exactly one record,
    /// whatever happened to its siblings.
    pub async fn resolve_batch(
        &self,
        origin: Coordinate,
        items: &[BatchItem],
    ) -> Result<Vec<DistanceRecord>, ResolveError> {
        self.run_batch(origin, items, None).await
    }

    /// Like [`Resolver::resolve_batch`], but items still unresolved after
    /// `deadline` come back as `TimedOut` sentinels.
    pub async fn resolve_batch_with_deadline(
        &self,
        origin: Coordinate,
        items: &[BatchItem],
        deadline: Duration,
    ) -> Result<Vec<DistanceRecord>, ResolveError> {
        self.run_batch(origin, items, Some(Instant::now() + deadline))
            .await
    }

    /// Waits for every background write queued so far.
    pub async fn flush(&self) -> Result<(), GeoError> {
        self.writeback.flush().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            l1_hits: self.stats.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.stats.l2_hits.load(Ordering::Relaxed),
            l3_hits: self.stats.l3_hits.load(Ordering::Relaxed),
            negative_hits: self.stats.negative_hits.load(Ordering::Relaxed),
            provider_calls: self.stats.provider_calls.load(Ordering::Relaxed),
            provider_failures: self.stats.provider_failures.load(Ordering::Relaxed),
            dropped_writebacks: self.writeback.dropped(),
        }
    }

    pub fn process_cache(&self) -> &ProcessCache {
        &self.l1
    }

    async fn run_batch(
        &self,
        origin: Coordinate,
        items: &[BatchItem],
        deadline: Option<Instant>,
    ) -> Result<Vec<DistanceRecord>, ResolveError> {
        let origin = checked_origin(origin)?;
        let mut results: Vec<Option<DistanceRecord>> = vec![None; items.len()];
        let mut pending = Vec::new();

        for (idx, item) in items.iter().enumerate() {
            if let Err(e) = validate_address(&item.address) {
                results[idx] = Some(DistanceRecord::invalid(item, e));
                continue;
            }
            let key = normalize(&item.address);
            if key.is_empty() {
                results[idx] = Some(DistanceRecord::sentinel(item, ResolutionStatus::Empty, None));
                continue;
            }
            match self.resolve_from_process(&origin, &key, item) {
                Some(record) => results[idx] = Some(record),
                None => pending.push((idx, key)),
            }
        }

        if !pending.is_empty() {
            log::debug!(
                "[BATCH] {} of {} items missed L1",
                pending.len(),
                items.len()
            );
            let lower = self.resolve_lower_tiers(&origin, items, pending, &mut results);
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, lower).await.is_err() {
                        log::warn!("[BATCH] deadline reached, returning unfinished items as sentinels");
                    }
                }
                None => lower.await,
            }
        }

        let mut records: Vec<DistanceRecord> = results
            .into_iter()
            .zip(items)
            .map(|(record, item)| {
                record.unwrap_or_else(|| {
                    DistanceRecord::sentinel(item, ResolutionStatus::TimedOut, None)
                })
            })
            .collect();
        records.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(records)
    }

    /// L3 batched, then L2 and L4 with bounded fan-out. Results are written
    /// into `results` as they arrive, so a deadline keeps finished items.
    async fn resolve_lower_tiers(
        &self,
        origin: &Origin,
        items: &[BatchItem],
        mut pending: Vec<(usize, AddressKey)>,
        results: &mut [Option<DistanceRecord>],
    ) {
        let mut ids: Vec<EntityId> = pending
            .iter()
            .filter_map(|(idx, _)| items[*idx].entity_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if !ids.is_empty() {
            let found = self.lookup_store(&ids).await;
            let mut by_key: HashMap<AddressKey, Coordinate> = HashMap::new();
            pending.retain(|(idx, key)| {
                let item = &items[*idx];
                match item.entity_id.and_then(|id| found.get(&id)) {
                    Some(coord) => {
                        results[*idx] = Some(self.accept_store(item, origin, key, *coord));
                        by_key.entry(key.clone()).or_insert(*coord);
                        false
                    }
                    None => true,
                }
            });
            // Siblings with the same address reuse the stored coordinate
            // instead of going on to L2 and L4.
            if !by_key.is_empty() {
                pending.retain(|(idx, key)| match by_key.get(key) {
                    Some(coord) => {
                        results[*idx] = Some(self.record_for(
                            &items[*idx],
                            origin,
                            key,
                            Cached::Found(*coord),
                            Tier::Store,
                        ));
                        false
                    }
                    None => true,
                });
            }
        }

        // Items sharing an address share one L2 lookup and one L4 call.
        let mut groups: HashMap<AddressKey, Vec<usize>> = HashMap::new();
        for (idx, key) in pending {
            groups.entry(key).or_default().push(idx);
        }

        let mut unresolved = Vec::new();
        let mut lookups = stream::iter(groups.into_iter().map(|(key, idxs)| async move {
            let hit = self.lookup_distributed(&key).await;
            (key, idxs, hit)
        }))
        .buffer_unordered(self.concurrency);
        while let Some((key, idxs, hit)) = lookups.next().await {
            match hit {
                Some(cached) => {
                    self.l1.put(&key, cached);
                    for idx in idxs {
                        results[idx] =
                            Some(self.record_for(&items[idx], origin, &key, cached, Tier::Distributed));
                    }
                }
                None => unresolved.push((key, idxs)),
            }
        }
        drop(lookups);

        let mut calls = stream::iter(unresolved.into_iter().map(|(key, idxs)| {
            let address = items[idxs[0]].address.trim().to_string();
            async move {
                let outcome = self.call_provider(&address).await;
                (key, idxs, outcome)
            }
        }))
        .buffer_unordered(self.concurrency);
        while let Some((key, idxs, outcome)) = calls.next().await {
            let entity_ids: Vec<EntityId> =
                idxs.iter().filter_map(|idx| items[*idx].entity_id).collect();
            let cached = self.accept_provider(&key, outcome, &entity_ids);
            for idx in idxs {
                results[idx] = Some(self.record_for(&items[idx], origin, &key, cached, Tier::Provider));
            }
        }
    }

    fn resolve_from_process(
        &self,
        origin: &Origin,
        key: &AddressKey,
        item: &BatchItem,
    ) -> Option<DistanceRecord> {
        if let Some(entry) = self.l1.get_distance(&DistanceKey::new(&origin.key, key)) {
            bump(&self.stats.l1_hits);
            return Some(DistanceRecord::from_entry(item, entry, Tier::Process));
        }
        let cached = self.l1.get(key)?;
        bump(&self.stats.l1_hits);
        Some(self.record_for(item, origin, key, cached, Tier::Process))
    }

    /// Turns a coordinate (or negative entry) into a record, memoizing the distance.
    fn record_for(
        &self,
        item: &BatchItem,
        origin: &Origin,
        key: &AddressKey,
        cached: Cached,
        source: Tier,
    ) -> DistanceRecord {
        let Some(coord) = cached.coordinate() else {
            // A fresh L4 miss is counted as a provider call, not a cache hit.
            if source != Tier::Provider {
                bump(&self.stats.negative_hits);
            }
            return DistanceRecord::sentinel(item, ResolutionStatus::NotFound, Some(source));
        };
        let distance_km = origin.coord.distance_to(&coord);
        let entry = DistanceEntry {
            distance_km,
            travel_time_minutes: travel_time_minutes(distance_km),
            coordinate: coord,
        };
        self.l1.put_distance(DistanceKey::new(&origin.key, key), entry);
        DistanceRecord::from_entry(item, entry, source)
    }

    async fn lookup_distributed(&self, key: &AddressKey) -> Option<Cached> {
        match timeout(self.tier_timeout, self.distributed.get(key)).await {
            Ok(Ok(Some(cached))) => {
                bump(&self.stats.l2_hits);
                log::debug!("[L2] hit for \"{}\"", key);
                Some(cached)
            }
            Ok(Ok(None)) => {
                log::debug!("[L2] miss for \"{}\"", key);
                None
            }
            Ok(Err(e)) => {
                log::warn!("[L2] lookup failed for \"{}\", treating as miss: {}", key, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[L2] lookup for \"{}\" timed out after {:?}, treating as miss",
                    key,
                    self.tier_timeout
                );
                None
            }
        }
    }

    async fn lookup_store(&self, ids: &[EntityId]) -> HashMap<EntityId, Coordinate> {
        match timeout(self.tier_timeout, self.store.batch_get_coordinates(ids)).await {
            Ok(Ok(found)) => {
                log::debug!("[L3] {} of {} entities have coordinates", found.len(), ids.len());
                found
                    .into_iter()
                    .filter(|(_, coord)| coord.is_valid() && !coord.is_sentinel())
                    .collect()
            }
            Ok(Err(e)) => {
                log::warn!("[L3] batch lookup of {} entities failed, treating as miss: {}", ids.len(), e);
                HashMap::new()
            }
            Err(_) => {
                log::warn!("[L3] batch lookup timed out after {:?}, treating as miss", self.tier_timeout);
                HashMap::new()
            }
        }
    }

    fn accept_store(
        &self,
        item: &BatchItem,
        origin: &Origin,
        key: &AddressKey,
        coord: Coordinate,
    ) -> DistanceRecord {
        bump(&self.stats.l3_hits);
        self.l1.pin(key, coord);
        self.writeback.enqueue(WriteBack::Distributed {
            key: key.clone(),
            coord,
            ttl: self.l1.ttl(),
        });
        self.record_for(item, origin, key, Cached::Found(coord), Tier::Store)
    }

    /// The timeout covers the request only, not the wait for a rate-limit slot.
    async fn call_provider(&self, address: &str) -> Result<Option<Coordinate>, GeoError> {
        self.provider.ready().await;
        bump(&self.stats.provider_calls);
        match timeout(self.provider_timeout, self.provider.geocode(address)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GeoError::Timeout(self.provider_timeout)),
        }
    }

    /// Caches a provider outcome. Failures and empty answers both become a
    /// negative L1 entry so the provider is not asked again within the TTL.
    fn accept_provider(
        &self,
        key: &AddressKey,
        outcome: Result<Option<Coordinate>, GeoError>,
        entity_ids: &[EntityId],
    ) -> Cached {
        let cached = match outcome {
            Ok(Some(coord)) if coord.is_valid() => Cached::Found(coord),
            Ok(Some(coord)) => {
                log::warn!("[L4] provider returned out-of-range {:?} for \"{}\"", coord, key);
                Cached::Negative
            }
            Ok(None) => {
                log::debug!("[L4] no result for \"{}\"", key);
                Cached::Negative
            }
            Err(e) => {
                bump(&self.stats.provider_failures);
                log::warn!("[L4] geocoding \"{}\" failed: {}", key, e);
                Cached::Negative
            }
        };

        self.l1.put(key, cached);
        if let Cached::Found(coord) = cached {
            self.writeback.enqueue(WriteBack::Distributed {
                key: key.clone(),
                coord,
                ttl: self.l1.ttl(),
            });
            for id in entity_ids {
                self.writeback.enqueue(WriteBack::Store { id: *id, coord });
            }
        }
        cached
    }
}

/// Runs a tier's connect under `limit`. `None` means run without the tier.
async fn connect_within<T, F>(tier: &str, limit: Duration, connect: F) -> Option<T>
where
    F: Future<Output = Result<T, GeoError>>,
{
    match timeout(limit, connect).await {
        Ok(Ok(conn)) => Some(conn),
        Ok(Err(e)) => {
            log::warn!("[{}] unavailable, running without it: {}", tier, e);
            None
        }
        Err(_) => {
            log::warn!(
                "[{}] connect timed out after {:?}, running without it",
                tier,
                limit
            );
            None
        }
    }
}

fn checked_origin(coord: Coordinate) -> Result<Origin, ResolveError> {
    if !coord.is_valid() {
        return Err(ResolveError::InvalidOrigin {
            lat: coord.lat,
            lng: coord.lng,
        });
    }
    Ok(Origin {
        key: OriginKey::from_coordinate(&coord),
        coord,
    })
}
