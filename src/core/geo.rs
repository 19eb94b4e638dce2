use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0088;
const METERS_PER_DEG_LAT: f64 = 111_320.0;
/// Kilometres per degree of latitude, used for map-scale circle areas.
pub const KM_PER_DEG: f64 = 111.32;

/// A point in WGS84 degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Approximate degree radius covering `meters` on the ground at `lat_deg`.
/// Longitude shrinks by cos(latitude); the smaller delta is returned so
/// buffers never over-inflate east-west. Isotropic degree buffers are
/// accepted as sufficient for map-scale visualization.
pub fn degree_buffer_for_meters(lat_deg: f64, meters: f64) -> f64 {
    let meters_per_deg_lon = METERS_PER_DEG_LAT * lat_deg.to_radians().cos().max(0.1);
    let deg_lat = meters / METERS_PER_DEG_LAT;
    let deg_lon = meters / meters_per_deg_lon;
    deg_lat.min(deg_lon)
}

/// Coarse spatial bucket: coordinates rounded to `decimals` places.
/// 2 decimals is roughly a 1 km cell, 1 decimal roughly 10 km.
pub fn cell_key(point: GeoPoint, decimals: u32) -> (i64, i64) {
    let scale = 10f64.powi(decimals as i32);
    (
        (point.lat * scale).round() as i64,
        (point.lon * scale).round() as i64,
    )
}

/// A buffered circular footprint around a point, radius in degrees.
/// Stands in for polygon geometry at map scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CircleArea {
    pub center: GeoPoint,
    pub radius_deg: f64,
}

impl CircleArea {
    /// Buffer a point by roughly `meters`; a degenerate (non-finite) point
    /// or radius falls back to a small fixed buffer instead of dropping
    /// the row.
    pub fn buffer(center: GeoPoint, meters: f64, fallback_deg: f64) -> Self {
        if !center.is_finite() {
            return Self {
                center: GeoPoint::new(0.0, 0.0),
                radius_deg: fallback_deg,
            };
        }
        let radius_deg = degree_buffer_for_meters(center.lat, meters);
        let radius_deg = if radius_deg.is_finite() && radius_deg > 0.0 {
            radius_deg
        } else {
            fallback_deg
        };
        Self { center, radius_deg }
    }

    pub fn from_km(center: GeoPoint, radius_km: f64) -> Self {
        Self {
            center,
            radius_deg: radius_km / KM_PER_DEG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Lusaka to Ndola is about 275 km.
        let lusaka = GeoPoint::new(-15.3875, 28.3228);
        let ndola = GeoPoint::new(-12.9587, 28.6366);
        let d = haversine_km(lusaka, ndola);
        assert!((d - 272.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn zero_distance_to_self() {
        let p = GeoPoint::new(-15.0, 28.0);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn degree_buffer_prefers_smaller_delta() {
        // At the equator lat/lon deltas match; away from it the lat delta
        // is smaller and must win.
        let at_equator = degree_buffer_for_meters(0.0, 3_000.0);
        assert!((at_equator - 3_000.0 / 111_320.0).abs() < 1e-9);
        let at_60 = degree_buffer_for_meters(60.0, 3_000.0);
        assert!((at_60 - 3_000.0 / 111_320.0).abs() < 1e-9);
    }

    #[test]
    fn buffer_falls_back_on_degenerate_point() {
        let area = CircleArea::buffer(GeoPoint::new(f64::NAN, 28.0), 3_000.0, 0.01);
        assert_eq!(area.radius_deg, 0.01);
    }

    #[test]
    fn cell_key_buckets_nearby_points() {
        let a = cell_key(GeoPoint::new(-15.3875, 28.3228), 2);
        let b = cell_key(GeoPoint::new(-15.3901, 28.3199), 2);
        assert_eq!(a, b);
        let far = cell_key(GeoPoint::new(-15.51, 28.32), 2);
        assert_ne!(a, far);
    }

    #[test]
    fn from_km_scales_by_degree_length() {
        let area = CircleArea::from_km(GeoPoint::new(-15.0, 28.0), 3.0);
        assert!((area.radius_deg - 3.0 / KM_PER_DEG).abs() < 1e-12);
    }
}
