//! Authoritative (L3) coordinate store: the relational table that already
//! tracks where known garages are.

use super::distance::Coordinate;
use super::error::GeoError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Identifier of an entity (a garage) whose coordinates the store tracks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait CoordinateStore: Send + Sync {
    /// One query for all ids. Ids with no stored coordinate are absent from the map.
    async fn batch_get_coordinates(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Coordinate>, GeoError>;

    async fn update_coordinate(&self, id: EntityId, coord: Coordinate) -> Result<(), GeoError>;
}

/// Postgres-backed store over a table with `id`, `latitude` and `longitude` columns.
#[derive(Clone)]
pub struct PgCoordinateStore {
    pool: PgPool,
    table: String,
}

impl PgCoordinateStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, "garages")
    }

    /// `table` is interpolated into SQL, so it must come from configuration, never a request.
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// `acquire_timeout` bounds every later wait for a pooled connection too.
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self, GeoError> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        log::info!("[L3] connected to Postgres");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl CoordinateStore for PgCoordinateStore {
    async fn batch_get_coordinates(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Coordinate>, GeoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let sql = format!(
            "SELECT id, latitude, longitude FROM {} WHERE id = ANY($1)",
            self.table
        );
        let rows: Vec<(i64, Option<f64>, Option<f64>)> = sqlx::query_as(&sql)
            .bind(raw_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, lat, lng)| match (lat, lng) {
                (Some(lat), Some(lng)) => Some((EntityId(id), Coordinate::new(lat, lng))),
                _ => None,
            })
            .collect())
    }

    async fn update_coordinate(&self, id: EntityId, coord: Coordinate) -> Result<(), GeoError> {
        let sql = format!(
            "UPDATE {} SET latitude = $2, longitude = $3 WHERE id = $1",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(id.0)
            .bind(coord.lat)
            .bind(coord.lng)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            log::debug!("[L3] no row for entity {} while writing back coordinates", id);
        }
        Ok(())
    }
}

/// Knows nothing, stores nothing. Used when no database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStore;

#[async_trait]
impl CoordinateStore for NoOpStore {
    async fn batch_get_coordinates(
        &self,
        _ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Coordinate>, GeoError> {
        Ok(HashMap::new())
    }

    async fn update_coordinate(&self, _id: EntityId, _coord: Coordinate) -> Result<(), GeoError> {
        Ok(())
    }
}
