pub mod remote;
pub mod types;

pub use remote::RemoteGeocoder;

use super::distance::Coordinate;
use super::error::GeoError;
use async_trait::async_trait;

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Waits until the provider will accept another call. Time spent here
    /// is not part of the per-call timeout.
    async fn ready(&self) {}

    /// Resolves a free-text address. `Ok(None)` means the provider answered
    /// but had no candidate for it.
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeoError>;
}
