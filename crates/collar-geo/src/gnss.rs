use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use collar_proto::{elapsed_ms, DeviceClock, Position};

/// Horizontal accuracy estimate per unit of HDOP.
pub const ACCURACY_PER_HDOP_M: f32 = 3.0;

#[derive(Debug, Clone, Copy)]
struct GgaInfo {
    sats: u8,
    hdop: f32,
    alt_m: f32,
    has_fix: bool,
    at_ms: u32,
}

/// Pairs GGA quality data with the next RMC position.
#[derive(Debug, Clone)]
pub struct NmeaAssembler {
    min_sats: u8,
    max_hdop: f32,
    max_fix_age_ms: u32,
    last_gga: Option<GgaInfo>,
}

impl NmeaAssembler {
    pub fn new(min_sats: u8, max_hdop: f32, max_fix_age_ms: u32) -> Self {
        Self { min_sats, max_hdop, max_fix_age_ms, last_gga: None }
    }

    /// Feeds one sentence; an RMC sentence yields a `Position`, flagged
    /// invalid when the receiver or the quality gate rejects it.
    pub fn feed(&mut self, line: &str, now_ms: u32) -> Option<Position> {
        let s = line.trim();
        if !checksum_ok(s) {
            debug!(sentence = s, "nmea checksum mismatch");
            return None;
        }
        let body = s.split('*').next().unwrap_or(s);
        let parts: Vec<&str> = body.split(',').collect();
        let tag = parts.first().copied().unwrap_or_default();

        if tag.ends_with("GGA") && parts.len() > 9 {
            self.last_gga = Some(GgaInfo {
                has_fix: parts[6].parse::<u8>().unwrap_or(0) > 0,
                sats: parts[7].parse().unwrap_or(0),
                hdop: parts[8].parse().unwrap_or(99.9),
                alt_m: parts[9].parse().unwrap_or(0.0),
                at_ms: now_ms,
            });
            return None;
        }

        if tag.ends_with("RMC") && parts.len() > 6 {
            // parts[2]=status A/V, parts[3..=6]=lat,N/S,lon,E/W
            let active = parts[2] == "A";
            let coords = parse_deg_min(parts[3], parts[4]).zip(parse_deg_min(parts[5], parts[6]));
            let (Some((lat, lon)), true) = (coords, active) else {
                return Some(Position::invalid(now_ms));
            };

            let gga = self
                .last_gga
                .filter(|g| elapsed_ms(now_ms, g.at_ms) <= self.max_fix_age_ms)
                .unwrap_or(GgaInfo { sats: 0, hdop: 99.9, alt_m: 0.0, has_fix: false, at_ms: now_ms });
            let good = gga.has_fix && gga.sats >= self.min_sats && gga.hdop <= self.max_hdop;
            return Some(Position {
                latitude: lat,
                longitude: lon,
                altitude: gga.alt_m,
                accuracy: gga.hdop * ACCURACY_PER_HDOP_M,
                satellites: gga.sats,
                timestamp: now_ms,
                valid: good,
            });
        }

        None
    }

    /// HDOP of the most recent GGA sentence.
    pub fn hdop(&self) -> Option<f32> {
        self.last_gga.map(|g| g.hdop)
    }
}

pub enum GnssSource {
    Serial(BufReader<SerialStream>),
    File(BufReader<File>),
    Fixed(Position),
}

impl GnssSource {
    pub fn serial(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open serial {}", dev))?;
        Ok(Self::Serial(BufReader::new(port)))
    }

    pub fn file(path: &str) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("open nmea file {}", path))?;
        Ok(Self::File(BufReader::new(File::from_std(f))))
    }

    pub fn fixed(lat: f64, lon: f64) -> Self {
        Self::Fixed(Position::new(lat, lon, 0))
    }

    pub async fn next_position(&mut self, asm: &mut NmeaAssembler, clock: &DeviceClock) -> Result<Position> {
        let mut line = String::new();
        loop {
            line.clear();
            match self {
                GnssSource::Serial(r) => {
                    r.read_line(&mut line).await.context("read gnss serial")?;
                }
                GnssSource::File(r) => {
                    let n = r.read_line(&mut line).await.context("read nmea file")?;
                    if n == 0 {
                        // EOF: idle like a receiver that lost its antenna
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                        continue;
                    }
                }
                GnssSource::Fixed(p) => {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    return Ok(Position { timestamp: clock.now_ms(), ..*p });
                }
            }
            if let Some(pos) = asm.feed(&line, clock.now_ms()) {
                return Ok(pos);
            }
        }
    }
}

fn checksum_ok(s: &str) -> bool {
    let Some(body) = s.strip_prefix('$') else { return false };
    match body.split_once('*') {
        Some((payload, sum)) => {
            let calc = payload.bytes().fold(0u8, |acc, b| acc ^ b);
            u8::from_str_radix(sum.trim(), 16).map(|want| want == calc).unwrap_or(false)
        }
        // checksum is optional
        None => true,
    }
}

fn parse_deg_min(v: &str, hemi: &str) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    // lat: ddmm.mmmm, lon: dddmm.mmmm
    let dot = v.find('.')?;
    let deg_len = if dot > 4 { 3 } else { 2 };
    let deg: f64 = v.get(..deg_len)?.parse().ok()?;
    let min: f64 = v.get(deg_len..)?.parse().ok()?;
    let mut out = deg + (min / 60.0);
    if hemi == "S" || hemi == "W" {
        out = -out;
    }
    Some(out)
}
