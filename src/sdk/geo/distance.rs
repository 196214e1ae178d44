use serde::{Deserialize, Serialize};

/// Mean Earth radius used by [`haversine`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Assumed average travel speed. A crude stand-in for road routing.
pub const AVERAGE_SPEED_KMH: f64 = 30.0;

/// A (latitude, longitude) pair in decimal degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// The "unknown" coordinate handed back for anything that did not resolve.
    pub const SENTINEL: Coordinate = Coordinate { lat: 0.0, lng: 0.0 };

    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn is_sentinel(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    /// Great-circle distance to `other`, in kilometres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Great-circle distance between two points, in kilometres.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// Travel time in whole minutes at [`AVERAGE_SPEED_KMH`].
pub fn travel_time_minutes(km: f64) -> u32 {
    if !km.is_finite() || km <= 0.0 {
        return 0;
    }
    (km / AVERAGE_SPEED_KMH * 60.0).round() as u32
}

/// Renders a distance for display: whole metres below 1 km, otherwise km with one decimal.
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{} m", (km * 1000.0).round() as i64)
    } else {
        format!("{:.1} km", km)
    }
}
