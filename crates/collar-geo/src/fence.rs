use serde::{Deserialize, Serialize};

use collar_proto::{CollarError, GeoPoint};

use crate::geo::{distance_to_polygon_edge_m, haversine_m, point_in_polygon, polygon_area_m2, polygon_centroid};

pub const MIN_GEOFENCE_RADIUS_M: f32 = 10.0;
pub const MAX_GEOFENCE_RADIUS_M: f32 = 1000.0;
pub const MAX_POLYGON_POINTS: usize = 10;
pub const MIN_POLYGON_POINTS: usize = 3;
pub const MIN_POLYGON_AREA_M2: f64 = 100.0;
pub const MAX_NAME_LEN: usize = 31;
pub const MAX_GROUP_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceKind {
    Circle,
    Polygon,
}

/// A configured boundary. Built only through the validating constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    kind: FenceKind,
    active: bool,
    name: String,
    group_id: String,
    center: GeoPoint,
    /// Circle radius; for polygons the farthest vertex from the centroid.
    radius_m: f32,
    points: Vec<GeoPoint>,
}

impl Geofence {
    pub fn circle(name: &str, center: GeoPoint, radius_m: f32) -> Result<Self, CollarError> {
        check_name(name)?;
        if !center.is_valid() {
            return Err(CollarError::invalid(format!("center ({}, {}) out of range", center.lat, center.lng)));
        }
        if !(MIN_GEOFENCE_RADIUS_M..=MAX_GEOFENCE_RADIUS_M).contains(&radius_m) {
            return Err(CollarError::invalid(format!(
                "radius {}m outside {}..={}m",
                radius_m, MIN_GEOFENCE_RADIUS_M, MAX_GEOFENCE_RADIUS_M
            )));
        }
        Ok(Self {
            kind: FenceKind::Circle,
            active: true,
            name: name.to_string(),
            group_id: String::new(),
            center,
            radius_m,
            points: Vec::new(),
        })
    }

    pub fn polygon(name: &str, points: &[GeoPoint]) -> Result<Self, CollarError> {
        check_name(name)?;
        if !(MIN_POLYGON_POINTS..=MAX_POLYGON_POINTS).contains(&points.len()) {
            return Err(CollarError::invalid(format!(
                "polygon needs {}..={} points, got {}",
                MIN_POLYGON_POINTS,
                MAX_POLYGON_POINTS,
                points.len()
            )));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
            return Err(CollarError::invalid(format!("polygon point ({}, {}) out of range", bad.lat, bad.lng)));
        }
        let area = polygon_area_m2(points);
        if area <= MIN_POLYGON_AREA_M2 {
            return Err(CollarError::invalid(format!("polygon area {:.1} m2 too small", area)));
        }

        let center = polygon_centroid(points);
        let radius_m = points
            .iter()
            .map(|p| haversine_m(center.lat, center.lng, p.lat, p.lng))
            .fold(0.0, f64::max) as f32;

        Ok(Self {
            kind: FenceKind::Polygon,
            active: true,
            name: name.to_string(),
            group_id: String::new(),
            center,
            radius_m,
            points: points.to_vec(),
        })
    }

    pub fn with_group(mut self, group_id: &str) -> Result<Self, CollarError> {
        if group_id.chars().count() > MAX_GROUP_LEN {
            return Err(CollarError::invalid(format!("group id longer than {} chars", MAX_GROUP_LEN)));
        }
        self.group_id = group_id.to_string();
        Ok(self)
    }

    pub fn kind(&self) -> FenceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    pub fn radius_m(&self) -> f32 {
        self.radius_m
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Signed metres to the boundary: positive inside, negative outside.
    pub fn distance_to_limit(&self, lat: f64, lng: f64) -> f32 {
        match self.kind {
            FenceKind::Circle => {
                let d = haversine_m(lat, lng, self.center.lat, self.center.lng);
                (self.radius_m as f64 - d) as f32
            }
            FenceKind::Polygon => {
                let edge = distance_to_polygon_edge_m(&self.points, lat, lng) as f32;
                if point_in_polygon(&self.points, lat, lng) {
                    edge
                } else {
                    -edge
                }
            }
        }
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        match self.kind {
            FenceKind::Circle => haversine_m(lat, lng, self.center.lat, self.center.lng) <= self.radius_m as f64,
            FenceKind::Polygon => point_in_polygon(&self.points, lat, lng),
        }
    }
}

fn check_name(name: &str) -> Result<(), CollarError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CollarError::invalid(format!("name longer than {} chars", MAX_NAME_LEN)));
    }
    Ok(())
}
