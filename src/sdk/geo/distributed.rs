//! Distributed (L2) cache shared by every resolver instance.

use super::address::AddressKey;
use super::cache::Cached;
use super::distance::Coordinate;
use super::error::GeoError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// `Ok(None)` is a miss. Errors are treated as misses by the resolver.
    async fn get(&self, key: &AddressKey) -> Result<Option<Cached>, GeoError>;

    async fn set(&self, key: &AddressKey, coord: Coordinate, ttl: Duration) -> Result<(), GeoError>;
}

/// Encodes a coordinate as the JSON pair `[lat, lng]`.
pub fn encode_value(coord: &Coordinate) -> Result<String, GeoError> {
    Ok(serde_json::to_string(&[coord.lat, coord.lng])?)
}

/// Decodes a stored value. A literal `[0, 0]` is read as a negative entry.
pub fn decode_value(raw: &str) -> Result<Cached, GeoError> {
    let [lat, lng]: [f64; 2] = serde_json::from_str(raw)?;
    let coord = Coordinate::new(lat, lng);
    if coord.is_sentinel() {
        Ok(Cached::Negative)
    } else {
        Ok(Cached::Found(coord))
    }
}

/// Redis-backed L2.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, GeoError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        log::info!("[L2] connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &AddressKey) -> Result<Option<Cached>, GeoError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.redis_key()).await?;
        match raw {
            Some(raw) => decode_value(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &AddressKey, coord: Coordinate, ttl: Duration) -> Result<(), GeoError> {
        let mut conn = self.conn.clone();
        let value = encode_value(&coord)?;
        conn.set_ex::<_, _, ()>(key.redis_key(), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

/// Always misses, always accepts writes. Used when no Redis is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCache;

#[async_trait]
impl DistributedCache for NoOpCache {
    async fn get(&self, _key: &AddressKey) -> Result<Option<Cached>, GeoError> {
        Ok(None)
    }

    async fn set(&self, _key: &AddressKey, _coord: Coordinate, _ttl: Duration) -> Result<(), GeoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_encoding_is_a_pair() {
        let coord = Coordinate::new(21.0285, 105.8048);
        let raw = encode_value(&coord).unwrap();
        assert_eq!(raw, "[21.0285,105.8048]");
        assert_eq!(decode_value(&raw).unwrap(), Cached::Found(coord));
    }

    #[test]
    fn zero_pair_reads_as_negative() {
        assert_eq!(decode_value("[0.0,0.0]").unwrap(), Cached::Negative);
        assert_eq!(decode_value("[0,0]").unwrap(), Cached::Negative);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(decode_value("{\"lat\":1}"), Err(GeoError::Parse(_))));
        assert!(decode_value("[1.0]").is_err());
    }

    #[tokio::test]
    async fn noop_always_misses() {
        let cache = NoOpCache;
        let key = crate::sdk::geo::address::normalize("Hanoi");
        cache
            .set(&key, Coordinate::new(1.0, 2.0), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
