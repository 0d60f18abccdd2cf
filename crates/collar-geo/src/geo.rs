use collar_proto::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres per degree used by the flat-earth approximation.
const M_PER_DEG: f64 = 111_000.0;

/// Great-circle distance in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Planar approximation, only trustworthy below ~1 km. Display use only.
pub fn fast_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dy = (lat2 - lat1) * M_PER_DEG;
    let dx = (lon2 - lon1) * M_PER_DEG * lat1.to_radians().cos();
    (dx * dx + dy * dy).sqrt()
}

/// Initial bearing from `from` to `to`, degrees in `[0, 360)`.
pub fn bearing_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    let dlon = (to.lng - from.lng).to_radians();
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    if deg >= 360.0 { 0.0 } else { deg }
}

// Equirectangular projection around (lat0, lon0), metres.
fn to_xy(lat: f64, lon: f64, lat0: f64, lon0: f64) -> (f64, f64) {
    let x = (lon - lon0).to_radians() * EARTH_RADIUS_M * lat0.to_radians().cos();
    let y = (lat - lat0).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

/// Distance from a point to the segment `a..b`, local plane.
pub fn dist_point_to_segment_m(lat: f64, lon: f64, a: GeoPoint, b: GeoPoint) -> f64 {
    let (x, y) = to_xy(lat, lon, a.lat, a.lng);
    let (bx, by) = to_xy(b.lat, b.lng, a.lat, a.lng);

    let c1 = x * bx + y * by;
    if c1 <= 0.0 {
        return (x * x + y * y).sqrt();
    }
    let c2 = bx * bx + by * by;
    if c2 <= c1 {
        return ((x - bx).powi(2) + (y - by).powi(2)).sqrt();
    }
    let t = c1 / c2;
    ((x - t * bx).powi(2) + (y - t * by).powi(2)).sqrt()
}

/// Ray casting polygon test
pub fn point_in_polygon(poly: &[GeoPoint], lat: f64, lon: f64) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (poly[i].lng, poly[i].lat);
        let (xj, yj) = (poly[j].lng, poly[j].lat);
        let intersect = ((yi > lat) != (yj > lat)) && (lon < (xj - xi) * (lat - yi) / (yj - yi + 1e-12) + xi);
        if intersect {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Unsigned distance to the nearest polygon edge (closing edge included).
pub fn distance_to_polygon_edge_m(poly: &[GeoPoint], lat: f64, lon: f64) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| dist_point_to_segment_m(lat, lon, poly[i], poly[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

pub fn polygon_centroid(poly: &[GeoPoint]) -> GeoPoint {
    if poly.is_empty() {
        return GeoPoint::default();
    }
    let n = poly.len() as f64;
    let (lat, lng) = poly.iter().fold((0.0, 0.0), |(la, lo), p| (la + p.lat, lo + p.lng));
    GeoPoint::new(lat / n, lng / n)
}

/// Shoelace area in square metres, projected around the first vertex.
pub fn polygon_area_m2(poly: &[GeoPoint]) -> f64 {
    let Some(origin) = poly.first() else { return 0.0 };
    let pts: Vec<(f64, f64)> = poly.iter().map(|p| to_xy(p.lat, p.lng, origin.lat, origin.lng)).collect();
    let n = pts.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (x1, y1) = pts[i];
            let (x2, y2) = pts[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum();
    twice.abs() / 2.0
}

/// Point `distance_m` away from `origin` along `bearing_deg`.
pub fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let d = distance_m / EARTH_RADIUS_M;
    let brg = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lng.to_radians();
    let lat2 = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * brg.cos()).asin();
    let lon2 = lon1 + (brg.sin() * d.sin() * lat1.cos()).atan2(d.cos() - lat1.sin() * lat2.sin());
    GeoPoint::new(lat2.to_degrees(), lon2.to_degrees())
}
