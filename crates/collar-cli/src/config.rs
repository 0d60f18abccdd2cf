use anyhow::{Context, Result};
use serde::Deserialize;

use collar_alert::{BatteryLimits, ControllerConfig, DispatchConfig, EscalationConfig};
use collar_geo::{doctor as geo_doctor, Geofence, GeofenceStore};
use collar_proto::GeoPoint;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceCfg,
    pub gnss: GnssCfg,
    pub geofence: FenceCfg,
    #[serde(default)]
    pub extra_fences: Vec<FenceCfg>,
    #[serde(default)]
    pub alert: AlertCfg,
    pub radio: Option<RadioCfg>,
    #[serde(default)]
    pub battery: BatteryCfg,
}

#[derive(Debug, Deserialize)]
pub struct DeviceCfg {
    /// Identifier the backend keys this collar's config by.
    pub id: String,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct GnssCfg {
    /// nmea-serial | nmea-file | fixed
    pub source: String,
    pub nmea_device: Option<String>,
    pub baud: Option<u32>,
    pub nmea_file: Option<String>,
    pub fixed_lat: Option<f64>,
    pub fixed_lon: Option<f64>,
    pub min_sats: u8,
    pub max_hdop: f32,
    /// Older fixes count as lost.
    #[serde(default = "default_max_fix_age_ms")]
    pub max_fix_age_ms: u32,
}

fn default_max_fix_age_ms() -> u32 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FenceCfg {
    pub name: String,
    #[serde(default)]
    pub group_id: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius_m: f32,
    /// When set, the fence is a polygon and the center/radius are derived.
    #[serde(default)]
    pub polygon: Vec<GeoPoint>,
    #[serde(default = "enabled")]
    pub active: bool,
}

impl FenceCfg {
    pub fn build(&self) -> Result<Geofence> {
        let center = GeoPoint::new(self.center_lat, self.center_lng);
        let fence = geo_doctor::check_geofence(&self.name, center, self.radius_m, &self.polygon)?;
        fence
            .with_group(&self.group_id)
            .with_context(|| format!("geofence '{}' group_id", self.name))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdsCfg {
    pub caution: f32,
    pub warning: f32,
    pub danger: f32,
    pub emergency: f32,
}

impl Default for ThresholdsCfg {
    fn default() -> Self {
        Self { caution: 20.0, warning: 10.0, danger: 5.0, emergency: 0.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlertCfg {
    pub thresholds_m: ThresholdsCfg,
    pub escalation_enabled: bool,
    pub time_to_escalate_ms: u32,
    pub reset_on_improvement: bool,
    pub auto_stop: bool,
    pub audio_enabled: bool,
    pub display_enabled: bool,
    pub battery_low_v: f32,
    pub battery_critical_v: f32,
}

impl Default for AlertCfg {
    fn default() -> Self {
        let esc = EscalationConfig::default();
        let bat = BatteryLimits::default();
        Self {
            thresholds_m: ThresholdsCfg::default(),
            escalation_enabled: esc.enabled,
            time_to_escalate_ms: esc.time_to_escalate_ms,
            reset_on_improvement: esc.reset_on_improvement,
            auto_stop: true,
            audio_enabled: true,
            display_enabled: true,
            battery_low_v: bat.low_v,
            battery_critical_v: bat.critical_v,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RadioCfg {
    pub enable: bool,
    pub serial_dev: String,
    pub baud: u32,
    #[serde(default = "default_modem_timeout_ms")]
    pub timeout_ms: u64,
    pub spool_dir: String,
    pub spool_max_kb: u64,
    pub tx_interval_ms: Option<TxIntervalsCfg>,
}

fn default_modem_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TxIntervalsCfg {
    pub safe: u32,
    pub caution: u32,
    pub warning: u32,
    pub danger: u32,
    pub emergency: u32,
}

impl TxIntervalsCfg {
    pub fn as_array(&self) -> [u32; 5] {
        [self.safe, self.caution, self.warning, self.danger, self.emergency]
    }
}

#[derive(Debug, Deserialize)]
pub struct BatteryCfg {
    /// sysfs | fixed
    pub source: String,
    pub sysfs_path: Option<String>,
    pub fixed_voltage: Option<f32>,
}

impl Default for BatteryCfg {
    fn default() -> Self {
        Self { source: "fixed".into(), sysfs_path: None, fixed_voltage: Some(4.0) }
    }
}

fn enabled() -> bool {
    true
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

impl Config {
    /// Geofence store with the primary fence, the extra fences and the threshold table.
    pub fn build_store(&self) -> Result<GeofenceStore> {
        let t = self.alert.thresholds_m;
        let table = geo_doctor::check_thresholds(t.caution, t.warning, t.danger, t.emergency)?;
        let mut store = GeofenceStore::new(table);

        store.set_geofence(self.geofence.build()?)?;
        store.activate(self.geofence.active)?;
        for f in &self.extra_fences {
            let idx = store.add_geofence(f.build()?)?;
            store.set_fence_active(idx, f.active)?;
        }
        Ok(store)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let a = &self.alert;
        let mut dispatch = DispatchConfig {
            audio_enabled: a.audio_enabled,
            display_enabled: a.display_enabled,
            ..DispatchConfig::default()
        };
        if let Some(tx) = self.radio.as_ref().and_then(|r| r.tx_interval_ms) {
            dispatch.tx_interval_ms = tx.as_array();
        }
        ControllerConfig {
            escalation: EscalationConfig {
                enabled: a.escalation_enabled,
                time_to_escalate_ms: a.time_to_escalate_ms,
                reset_on_improvement: a.reset_on_improvement,
            },
            battery: BatteryLimits { low_v: a.battery_low_v, critical_v: a.battery_critical_v },
            auto_stop: a.auto_stop,
            dispatch,
        }
    }
}
