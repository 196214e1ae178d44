use crate::sdk::geo::distance::Coordinate;
use crate::sdk::geo::error::GeoError;
use serde::Deserialize;

// GeoJSON search response. Positions are [lon, lat].

#[derive(Deserialize)]
pub struct GeoResponse {
    pub features: Vec<Feature>,
}
#[derive(Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
}
#[derive(Deserialize)]
pub struct Geometry {
    pub coordinates: [f64; 2],
}

impl GeoResponse {
    /// The first candidate is authoritative.
    pub fn first_position(&self) -> Option<Coordinate> {
        self.features.first().map(|f| {
            let [lon, lat] = f.geometry.coordinates;
            Coordinate::new(lat, lon)
        })
    }
}

pub fn parse_first_position(body: &str) -> Result<Option<Coordinate>, GeoError> {
    let resp: GeoResponse = serde_json::from_str(body)?;
    Ok(resp.first_position())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_feature_and_swaps_axis_order() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [105.8048, 21.0285]}, "properties": {"label": "Hanoi"}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [106.7009, 10.7769]}}
            ]
        }"#;
        let coord = parse_first_position(body).unwrap().unwrap();
        assert_eq!(coord, Coordinate::new(21.0285, 105.8048));
    }

    #[test]
    fn empty_feature_list_is_no_result() {
        let body = r#"{"type": "FeatureCollection", "features": []}"#;
        assert_eq!(parse_first_position(body).unwrap(), None);
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(matches!(
            parse_first_position("<html>bad gateway</html>"),
            Err(GeoError::Parse(_))
        ));
    }
}
