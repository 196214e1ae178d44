use super::distance::Coordinate;
use super::error::ResolveError;
use std::fmt;

/// Longest address accepted from a caller, in characters.
pub const MAX_ADDRESS_LEN: usize = 512;

const REDIS_NAMESPACE: &str = "geo:coord:";

/// A normalized address used as a cache key in L1 and L2.
///
/// Only [`normalize`] builds one, so a raw caller string can never be used
/// where a key is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey(String);

impl AddressKey {
    /// The key every empty or whitespace-only address maps to.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespaced key under which the distributed cache stores this address.
    pub fn redis_key(&self) -> String {
        format!("{}{}", REDIS_NAMESPACE, self.0)
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims and case-folds a raw address. Total: never fails.
pub fn normalize(raw: &str) -> AddressKey {
    AddressKey(raw.trim().to_lowercase())
}

/// Rejects addresses that cannot be a real postal address.
pub fn validate_address(raw: &str) -> Result<(), ResolveError> {
    if raw.chars().count() > MAX_ADDRESS_LEN {
        return Err(ResolveError::InvalidAddress(format!(
            "address longer than {} characters",
            MAX_ADDRESS_LEN
        )));
    }
    if raw.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(ResolveError::InvalidAddress(
            "address contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Identifies an origin in the distance cache. Coordinates are rounded to
/// six decimals (about 10 cm) so float noise does not split entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginKey(String);

impl OriginKey {
    pub fn from_coordinate(origin: &Coordinate) -> Self {
        Self(format!("{:.6},{:.6}", origin.lat, origin.lng))
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
