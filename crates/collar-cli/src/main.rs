mod config;
mod host;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use collar_alert::{BatterySource, Collaborators, CollarController, Radio};
use collar_geo::gnss::{GnssSource, NmeaAssembler};
use collar_geo::{doctor as geo_doctor, geo, GeofenceEvaluator};
use collar_proto::{BatteryStatus, DeviceClock, Position};
use collar_uplink::modem::LoraModem;
use collar_uplink::spool::Spool;
use collar_uplink::{doctor as uplink_doctor, Uplink};

use crate::config::{load_config, Config, GnssCfg};
use crate::host::{FixedBattery, LogBuzzer, LogDisplay, NullRadio, SysfsBattery, TelemetryListener, WatchGps};

#[derive(Debug, Parser)]
#[command(name = "collar", version, about = "Livestock collar geofence alerting")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// Evaluate one position against the configured fences.
    Eval {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg),
        Command::Eval { lat, lon } => eval(&cfg, lat, lon),
        Command::Run => run(&cfg).await,
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    geo_doctor::check_gnss_thresholds(cfg.gnss.min_sats, cfg.gnss.max_hdop, cfg.gnss.max_fix_age_ms)?;

    // builds every fence and the threshold table through the validating constructors
    let store = cfg.build_store()?;
    info!(fences = store.fence_count() + 1, "doctor: geofences OK");

    geo_doctor::check_escalation(cfg.alert.time_to_escalate_ms)?;
    geo_doctor::check_battery_limits(cfg.alert.battery_low_v, cfg.alert.battery_critical_v)?;

    if let Some(r) = cfg.radio.as_ref().filter(|r| r.enable) {
        uplink_doctor::check_spool(&r.spool_dir, r.spool_max_kb)?;
        uplink_doctor::check_modem_timeout(r.timeout_ms)?;
        if let Some(tx) = r.tx_interval_ms {
            uplink_doctor::check_tx_intervals(&tx.as_array())?;
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn eval(cfg: &Config, lat: f64, lon: f64) -> Result<()> {
    anyhow::ensure!(collar_proto::is_valid_coordinate(lat, lon), "coordinate out of range: {}, {}", lat, lon);
    let mut store = cfg.build_store()?;
    let position = Position::new(lat, lon, 0);

    let ev = GeofenceEvaluator::new()
        .evaluate(&mut store, &position, 0)
        .context("no active geofence")?;
    let center = store.geofence().map(|f| f.center()).unwrap_or_default();

    let out = serde_json::json!({
        "distance_m": ev.distance_m,
        "level": ev.level,
        "inside": ev.inside,
        "inside_any": store.is_inside_any(&position),
        "center_bearing_deg": geo::bearing_deg(position.point(), center),
        "center_distance_m": geo::fast_distance_m(lat, lon, center.lat, center.lng),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn gnss_source(g: &GnssCfg) -> Result<GnssSource> {
    match g.source.as_str() {
        "nmea-serial" => {
            let dev = g.nmea_device.as_deref().context("gnss.nmea_device missing")?;
            GnssSource::serial(dev, g.baud.unwrap_or(9600))
        }
        "nmea-file" => GnssSource::file(g.nmea_file.as_deref().context("gnss.nmea_file missing")?),
        "fixed" => {
            let lat = g.fixed_lat.context("gnss.fixed_lat missing")?;
            let lon = g.fixed_lon.context("gnss.fixed_lon missing")?;
            Ok(GnssSource::fixed(lat, lon))
        }
        other => anyhow::bail!("unknown gnss.source: {}", other),
    }
}

fn battery_source(cfg: &Config) -> Result<Box<dyn BatterySource + Send>> {
    let b = &cfg.battery;
    let limits = cfg.controller_config().battery;
    match b.source.as_str() {
        "sysfs" => {
            let path = b.sysfs_path.as_deref().context("battery.sysfs_path missing")?;
            Ok(Box::new(SysfsBattery::new(path, limits)))
        }
        "fixed" => {
            let v = b.fixed_voltage.context("battery.fixed_voltage missing")?;
            Ok(Box::new(FixedBattery(BatteryStatus::from_voltage(v, limits.low_v, limits.critical_v))))
        }
        other => anyhow::bail!("unknown battery.source: {}", other),
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!(device = %cfg.device.id, "run: starting");
    let clock = DeviceClock::start();
    let store = cfg.build_store()?;

    // GNSS reader task publishes whole snapshots; the control loop only reads them
    let (pos_tx, pos_rx) = watch::channel(Position::invalid(0));
    let mut gnss = gnss_source(&cfg.gnss)?;
    let mut asm = NmeaAssembler::new(cfg.gnss.min_sats, cfg.gnss.max_hdop, cfg.gnss.max_fix_age_ms);
    tokio::spawn(async move {
        loop {
            match gnss.next_position(&mut asm, &clock).await {
                Ok(p) => {
                    pos_tx.send_replace(p);
                }
                Err(e) => {
                    warn!("gnss: {:#}", e);
                    pos_tx.send_replace(Position::invalid(clock.now_ms()));
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let radio: Box<dyn Radio + Send> = match cfg.radio.as_ref().filter(|r| r.enable) {
        Some(r) => {
            let modem = LoraModem::open(&r.serial_dev, r.baud, Duration::from_millis(r.timeout_ms))?;
            let uplink = Uplink::new(modem, Spool::new(&r.spool_dir, r.spool_max_kb));
            let (radio, link) = collar_uplink::channel_radio(16);
            tokio::spawn(async move {
                if let Err(e) = collar_uplink::run(uplink, link).await {
                    warn!("uplink: stopped: {:#}", e);
                }
            });
            Box::new(radio)
        }
        None => {
            info!("radio disabled");
            Box::new(NullRadio)
        }
    };

    let hw = Collaborators {
        gps: Box::new(WatchGps::new(pos_rx.clone(), clock, cfg.gnss.max_fix_age_ms)),
        battery: battery_source(cfg)?,
        buzzer: Box::new(LogBuzzer::default()),
        display: Box::new(LogDisplay),
        radio,
    };
    let mut controller = CollarController::new(store, cfg.controller_config(), hw)?;
    controller.add_listener(Box::new(TelemetryListener::new(cfg.device.id.clone(), pos_rx)));
    controller.init(clock.now_ms());

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.device.tick_ms.max(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                controller.stop_alert(clock.now_ms());
                let stats = controller.escalator().stats(clock.now_ms());
                info!(total_alerts = stats.total_alerts, max_level = %stats.max_level_reached, "run: shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                controller.tick(clock.now_ms())?;
            }
        }
    }
}
