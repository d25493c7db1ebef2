//! Geospatial primitives for tenant geofence matching.
//!
//! All distances use a spherical-earth haversine (R = 6371 km); exact
//! ellipsoidal accuracy is not required for buffer-radius matching.
//! Polygon math works in the lat/lng plane with a local equirectangular
//! projection for distances, which is accurate at geofence scale.

use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of latitude.
const KM_PER_DEG: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A simple polygon defined by its vertices in order (closing edge implied).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub vertices: Vec<GeoPoint>,
}

impl GeoPolygon {
    pub fn new(vertices: Vec<GeoPoint>) -> Self {
        Self { vertices }
    }

    /// Ray-casting point-in-polygon test in the lat/lng plane.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        if self.vertices.len() < 3 {
            return false;
        }
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = &self.vertices[i];
            let vj = &self.vertices[j];
            if (vi.lat > p.lat) != (vj.lat > p.lat) {
                let x = (vj.lng - vi.lng) * (p.lat - vi.lat) / (vj.lat - vi.lat) + vi.lng;
                if p.lng < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Distance from a point to this polygon in km. Zero when the point is
    /// inside; otherwise the minimum distance to any boundary segment.
    pub fn distance_to_km(&self, p: &GeoPoint) -> f64 {
        if self.contains(p) {
            return 0.0;
        }
        if self.vertices.is_empty() {
            return f64::INFINITY;
        }
        if self.vertices.len() == 1 {
            return haversine_km(p, &self.vertices[0]);
        }
        let n = self.vertices.len();
        let mut min = f64::INFINITY;
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            let d = point_segment_km(p, a, b);
            if d < min {
                min = d;
            }
        }
        min
    }

    /// Polygon-intersection test: true when either polygon contains a
    /// vertex of the other, or any pair of boundary segments crosses.
    pub fn intersects(&self, other: &GeoPolygon) -> bool {
        if self.vertices.len() < 3 || other.vertices.len() < 3 {
            return false;
        }
        if other.vertices.iter().any(|v| self.contains(v)) {
            return true;
        }
        if self.vertices.iter().any(|v| other.contains(v)) {
            return true;
        }
        let n = self.vertices.len();
        let m = other.vertices.len();
        for i in 0..n {
            let a1 = &self.vertices[i];
            let a2 = &self.vertices[(i + 1) % n];
            for j in 0..m {
                let b1 = &other.vertices[j];
                let b2 = &other.vertices[(j + 1) % m];
                if segments_cross(a1, a2, b1, b2) {
                    return true;
                }
            }
        }
        false
    }

    /// Arithmetic mean of the vertices. Adequate as a facility reference
    /// point for straight-line distance reporting.
    pub fn centroid(&self) -> Option<GeoPoint> {
        if self.vertices.is_empty() {
            return None;
        }
        let n = self.vertices.len() as f64;
        let lat = self.vertices.iter().map(|v| v.lat).sum::<f64>() / n;
        let lng = self.vertices.iter().map(|v| v.lng).sum::<f64>() / n;
        Some(GeoPoint::new(lat, lng))
    }
}

/// Centroid across a set of polygons (vertex mean over all of them).
pub fn centroid_of(polygons: &[GeoPolygon]) -> Option<GeoPoint> {
    let total: usize = polygons.iter().map(|p| p.vertices.len()).sum();
    if total == 0 {
        return None;
    }
    let lat = polygons
        .iter()
        .flat_map(|p| p.vertices.iter())
        .map(|v| v.lat)
        .sum::<f64>()
        / total as f64;
    let lng = polygons
        .iter()
        .flat_map(|p| p.vertices.iter())
        .map(|v| v.lng)
        .sum::<f64>()
        / total as f64;
    Some(GeoPoint::new(lat, lng))
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Distance from point `p` to segment `a`..`b` in km, using a local
/// equirectangular projection centered on `p`'s latitude.
fn point_segment_km(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let cos_lat = p.lat.to_radians().cos();
    let project = |g: &GeoPoint| ((g.lng - p.lng) * cos_lat * KM_PER_DEG, (g.lat - p.lat) * KM_PER_DEG);
    let (ax, ay) = project(a);
    let (bx, by) = project(b);

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        ((-ax * dx - ay * dy) / len_sq).clamp(0.0, 1.0)
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    (cx * cx + cy * cy).sqrt()
}

/// Proper segment crossing test (shared endpoints count as crossing).
fn segments_cross(a1: &GeoPoint, a2: &GeoPoint, b1: &GeoPoint, b2: &GeoPoint) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    // Collinear overlap cases
    (d1 == 0.0 && on_segment(b1, b2, a1))
        || (d2 == 0.0 && on_segment(b1, b2, a2))
        || (d3 == 0.0 && on_segment(a1, a2, b1))
        || (d4 == 0.0 && on_segment(a1, a2, b2))
}

fn orientation(a: &GeoPoint, b: &GeoPoint, c: &GeoPoint) -> f64 {
    (b.lng - a.lng) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lng - a.lng)
}

fn on_segment(a: &GeoPoint, b: &GeoPoint, p: &GeoPoint) -> bool {
    p.lng >= a.lng.min(b.lng)
        && p.lng <= a.lng.max(b.lng)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}
