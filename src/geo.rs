//! Геометрия для поиска событий рядом с точкой.
//!
//! Расстояния считаются по формуле гаверсинусов на сфере радиусом 6371 км
//! и округляются до двух знаков. Bounding box нужен только как дешёвый
//! предварительный фильтр перед точным расчётом.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Километров в одном градусе широты (приближение для bounding box).
pub const KM_PER_DEGREE_LAT: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct GeoPoint {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> AppResult<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(AppError::InvalidInput(
                "latitude and longitude must be finite numbers".to_string(),
            ));
        }
        let point = GeoPoint { latitude, longitude };
        point.validate()?;
        Ok(point)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn km_to_meters(km: f64) -> f64 {
    km * 1000.0
}

/// Расстояние по большому кругу в километрах, округлённое до 0.01 км.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // h может выйти за 1.0 из-за погрешности
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    round2(EARTH_RADIUS_KM * c)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// Если `min_lon > max_lon`, прямоугольник пересекает антимеридиан.
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: GeoPoint) -> bool {
        if point.latitude < self.min_lat || point.latitude > self.max_lat {
            return false;
        }
        if self.min_lon <= self.max_lon {
            point.longitude >= self.min_lon && point.longitude <= self.max_lon
        } else {
            point.longitude >= self.min_lon || point.longitude <= self.max_lon
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }
}

/// Прямоугольник вокруг точки: 1° широты ≈ 111.32 км, долгота поправлена на cos(широты).
pub fn bounding_box(center: GeoPoint, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / KM_PER_DEGREE_LAT;
    let min_lat = (center.latitude - lat_delta).max(-90.0);
    let max_lat = (center.latitude + lat_delta).min(90.0);

    let cos_lat = center.latitude.to_radians().cos();
    let touches_pole = center.latitude - lat_delta <= -90.0 || center.latitude + lat_delta >= 90.0;

    if touches_pole || cos_lat <= f64::EPSILON {
        return BoundingBox { min_lat, max_lat, min_lon: -180.0, max_lon: 180.0 };
    }

    let lon_delta = radius_km / (KM_PER_DEGREE_LAT * cos_lat);
    if lon_delta >= 180.0 {
        return BoundingBox { min_lat, max_lat, min_lon: -180.0, max_lon: 180.0 };
    }

    BoundingBox {
        min_lat,
        max_lat,
        min_lon: wrap_longitude(center.longitude - lon_delta),
        max_lon: wrap_longitude(center.longitude + lon_delta),
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon < -180.0 {
        lon + 360.0
    } else if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn one_degree_of_longitude_on_equator() {
        let d = haversine_km(point(0.0, 0.0), point(0.0, 1.0));
        assert!((d - 111.19).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(GeoPoint::new(90.5, 0.0), Err(AppError::InvalidInput(_))));
        assert!(matches!(GeoPoint::new(0.0, -180.01), Err(AppError::InvalidInput(_))));
        assert!(matches!(GeoPoint::new(f64::NAN, 0.0), Err(AppError::InvalidInput(_))));
        assert!(GeoPoint::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn known_city_pair() {
        // Алматы -> Астана, около 970 км
        let almaty = point(43.2389, 76.8897);
        let astana = point(51.1605, 71.4704);
        let d = haversine_km(almaty, astana);
        assert!((d - 970.0).abs() < 15.0, "got {}", d);
    }

    #[test]
    fn bounding_box_wraps_antimeridian() {
        let bbox = bounding_box(point(0.0, 179.9), 50.0);
        assert!(bbox.crosses_antimeridian());
        assert!(bbox.contains(point(0.0, -179.9)));
        assert!(bbox.contains(point(0.0, 179.95)));
        assert!(!bbox.contains(point(0.0, 0.0)));
    }

    #[test]
    fn bounding_box_near_pole_spans_all_longitudes() {
        let bbox = bounding_box(point(89.9, 10.0), 50.0);
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
        assert_eq!(bbox.max_lat, 90.0);
    }

    #[test]
    fn km_to_meters_only_scales() {
        assert_eq!(km_to_meters(2.5), 2500.0);
    }

    fn coords() -> impl Strategy<Value = GeoPoint> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| GeoPoint { latitude: lat, longitude: lon })
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(a in coords(), b in coords()) {
            prop_assert_eq!(haversine_km(a, b), haversine_km(b, a));
        }

        #[test]
        fn distance_to_self_is_zero(a in coords()) {
            prop_assert_eq!(haversine_km(a, a), 0.0);
        }

        #[test]
        fn distance_never_exceeds_half_circumference(a in coords(), b in coords()) {
            let d = haversine_km(a, b);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= round2(std::f64::consts::PI * EARTH_RADIUS_KM) + 0.01);
        }

        #[test]
        fn bounding_box_contains_center(a in (-80.0f64..=80.0, -180.0f64..=180.0), r in 0.1f64..300.0) {
            let center = GeoPoint { latitude: a.0, longitude: a.1 };
            prop_assert!(bounding_box(center, r).contains(center));
        }
    }
}
