pub mod address;
pub mod cache;
pub mod distance;
pub mod distributed;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod store;
pub mod writeback;

pub use cache::{Cached, ProcessCache};
pub use distance::Coordinate;
pub use distributed::{DistributedCache, NoOpCache, RedisCache};
pub use error::{GeoError, ResolveError};
pub use provider::{GeocodingProvider, RemoteGeocoder};
pub use resolver::{BatchItem, DistanceRecord, Resolver};
pub use store::{CoordinateStore, EntityId, NoOpStore, PgCoordinateStore};
