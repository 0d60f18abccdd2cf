use tracing::{info, warn};

use collar_proto::{AlertLevel, CollarError, GeoPoint, Position};

use crate::fence::Geofence;
use crate::thresholds::ThresholdTable;

/// Additional fences held next to the primary one.
pub const MAX_GEOFENCES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FenceStats {
    /// Inside -> outside transitions.
    pub violations: u32,
    pub last_violation_ms: Option<u32>,
    /// Smallest distance-to-limit ever observed.
    pub min_distance_m: Option<f32>,
}

/// Owns the configured geofences and answers geometric queries.
///
/// Queries take the worst case across the primary fence (when active) and
/// every active additional fence.
#[derive(Debug, Default)]
pub struct GeofenceStore {
    primary: Option<Geofence>,
    active: bool,
    fences: Vec<Geofence>,
    thresholds: ThresholdTable,
    stats: FenceStats,
    was_inside: Option<bool>,
}

impl GeofenceStore {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self { thresholds, ..Self::default() }
    }

    // ----- primary fence -----

    /// Replaces the primary fence and activates it.
    pub fn set_geofence(&mut self, fence: Geofence) -> Result<(), CollarError> {
        info!(
            name = fence.name(),
            lat = fence.center().lat,
            lng = fence.center().lng,
            radius_m = fence.radius_m(),
            "geofence configured"
        );
        self.primary = Some(fence);
        self.active = true;
        self.was_inside = None;
        Ok(())
    }

    pub fn set_circle(&mut self, center: GeoPoint, radius_m: f32, name: &str) -> Result<(), CollarError> {
        let fence = Geofence::circle(name, center, radius_m).inspect_err(|e| warn!(error = %e, "geofence rejected"))?;
        self.set_geofence(fence)
    }

    pub fn geofence(&self) -> Option<&Geofence> {
        self.primary.as_ref()
    }

    pub fn activate(&mut self, on: bool) -> Result<(), CollarError> {
        if on && self.primary.is_none() {
            return Err(CollarError::invalid("no geofence to activate"));
        }
        self.active = on;
        info!(active = on, "geofence activation changed");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active && self.primary.is_some()
    }

    pub fn clear_current_geofence(&mut self) {
        self.primary = None;
        self.active = false;
        self.was_inside = None;
    }

    // ----- additional fences -----

    pub fn add_geofence(&mut self, fence: Geofence) -> Result<usize, CollarError> {
        if self.fences.len() >= MAX_GEOFENCES {
            return Err(CollarError::StoreFull { capacity: MAX_GEOFENCES });
        }
        info!(name = fence.name(), index = self.fences.len(), "geofence added");
        self.fences.push(fence);
        Ok(self.fences.len() - 1)
    }

    pub fn remove_geofence(&mut self, index: usize) -> Result<Geofence, CollarError> {
        if index >= self.fences.len() {
            return Err(out_of_range(index));
        }
        Ok(self.fences.remove(index))
    }

    pub fn update_geofence(&mut self, index: usize, fence: Geofence) -> Result<(), CollarError> {
        let slot = self.fences.get_mut(index).ok_or_else(|| out_of_range(index))?;
        *slot = fence;
        Ok(())
    }

    pub fn set_fence_active(&mut self, index: usize, active: bool) -> Result<(), CollarError> {
        let slot = self.fences.get_mut(index).ok_or_else(|| out_of_range(index))?;
        slot.set_active(active);
        Ok(())
    }

    pub fn geofence_at(&self, index: usize) -> Option<&Geofence> {
        self.fences.get(index)
    }

    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    fn active_fences(&self) -> impl Iterator<Item = &Geofence> {
        let primary = self.primary.as_ref().filter(|_| self.active);
        primary.into_iter().chain(self.fences.iter().filter(|f| f.is_active()))
    }

    pub fn has_active_fence(&self) -> bool {
        self.active_fences().next().is_some()
    }

    // ----- queries -----

    /// Inside the primary fence. False with no usable fix or no active fence.
    pub fn is_inside(&self, position: &Position) -> bool {
        match (&self.primary, self.active && position.is_usable()) {
            (Some(f), true) => f.contains(position.latitude, position.longitude),
            _ => false,
        }
    }

    /// Signed distance to the primary fence limit.
    pub fn distance_to_limit(&self, position: &Position) -> Option<f32> {
        if !self.active || !position.is_usable() {
            return None;
        }
        self.primary
            .as_ref()
            .map(|f| f.distance_to_limit(position.latitude, position.longitude))
    }

    /// Smallest signed distance-to-limit over all active fences.
    pub fn min_distance(&self, position: &Position) -> Option<f32> {
        if !position.is_usable() {
            return None;
        }
        self.active_fences()
            .map(|f| f.distance_to_limit(position.latitude, position.longitude))
            .reduce(f32::min)
    }

    pub fn is_inside_any(&self, position: &Position) -> bool {
        position.is_usable() && self.active_fences().any(|f| f.contains(position.latitude, position.longitude))
    }

    pub fn highest_alert_level(&self, position: &Position) -> AlertLevel {
        self.min_distance(position)
            .map(|d| self.thresholds.level_for(d))
            .unwrap_or(AlertLevel::Safe)
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: ThresholdTable) {
        self.thresholds = thresholds;
    }

    // ----- statistics -----

    pub fn stats(&self) -> FenceStats {
        self.stats
    }

    /// Feeds one evaluated sample into the running statistics.
    /// Returns true when this sample is an inside -> outside transition.
    pub fn record_observation(&mut self, inside: bool, distance_m: f32, now_ms: u32) -> bool {
        self.stats.min_distance_m = Some(match self.stats.min_distance_m {
            Some(m) => m.min(distance_m),
            None => distance_m,
        });

        let violated = self.was_inside == Some(true) && !inside;
        self.was_inside = Some(inside);
        if violated {
            self.stats.violations += 1;
            self.stats.last_violation_ms = Some(now_ms);
            warn!(distance_m, violations = self.stats.violations, "geofence violation");
        }
        violated
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
        info!("geofence store reset to defaults");
    }
}

fn out_of_range(index: usize) -> CollarError {
    CollarError::invalid(format!("geofence index {} out of range", index))
}
