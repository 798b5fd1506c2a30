/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two (lat, lon) pairs, in metres.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert!(haversine_meters(51.5, -0.1, 51.5, -0.1) < 1e-6);
    }

    #[test]
    fn test_london_to_paris() {
        // ~344 km
        let d = haversine_meters(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 344_000.0).abs() < 5_000.0, "got {}", d);
    }

    #[test]
    fn test_symmetry() {
        let ab = haversine_meters(10.0, 20.0, -30.0, 40.0);
        let ba = haversine_meters(-30.0, 40.0, 10.0, 20.0);
        assert!((ab - ba).abs() < 1e-6);
    }
}
