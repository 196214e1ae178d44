pub mod sdk;

pub use sdk::config::ResolverConfig;
pub use sdk::geo::address::{normalize, AddressKey};
pub use sdk::geo::distance::{format_distance, haversine, travel_time_minutes, Coordinate};
pub use sdk::geo::error::{GeoError, ResolveError};
pub use sdk::geo::resolver::{
    BatchItem, DistanceRecord, ResolutionStatus, Resolver, ResolverBuilder, StatsSnapshot, Tier,
};
pub use sdk::geo::store::EntityId;
