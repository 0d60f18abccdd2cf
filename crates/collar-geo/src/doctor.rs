use anyhow::{Context, Result};

use collar_proto::GeoPoint;

use crate::fence::Geofence;
use crate::thresholds::ThresholdTable;

pub fn check_gnss_thresholds(min_sats: u8, max_hdop: f32, max_fix_age_ms: u32) -> Result<()> {
    anyhow::ensure!(min_sats >= 3, "gnss.min_sats too low");
    anyhow::ensure!(max_hdop > 0.5 && max_hdop <= 10.0, "gnss.max_hdop out of range");
    anyhow::ensure!((1_000..=60_000).contains(&max_fix_age_ms), "gnss.max_fix_age_ms should be 1000..60000");
    Ok(())
}

/// Builds the fence exactly as the runtime would, so config errors surface here first.
pub fn check_geofence(name: &str, center: GeoPoint, radius_m: f32, polygon: &[GeoPoint]) -> Result<Geofence> {
    let fence = if polygon.is_empty() {
        Geofence::circle(name, center, radius_m)
    } else {
        Geofence::polygon(name, polygon)
    };
    fence.with_context(|| format!("geofence '{}'", name))
}

pub fn check_thresholds(caution: f32, warning: f32, danger: f32, emergency: f32) -> Result<ThresholdTable> {
    ThresholdTable::from_margins(caution, warning, danger, emergency).context("alert.thresholds_m")
}

pub fn check_escalation(time_to_escalate_ms: u32) -> Result<()> {
    anyhow::ensure!(time_to_escalate_ms > 0, "alert.time_to_escalate_ms must be > 0");
    Ok(())
}

pub fn check_battery_limits(low_v: f32, critical_v: f32) -> Result<()> {
    anyhow::ensure!(critical_v > 0.0, "alert.battery_critical_v must be > 0");
    anyhow::ensure!(low_v > critical_v, "alert.battery_low_v must be above battery_critical_v");
    Ok(())
}
