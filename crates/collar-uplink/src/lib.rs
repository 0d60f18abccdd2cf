pub mod doctor;
pub mod modem;
pub mod spool;

use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, warn};

use collar_alert::Radio;
use collar_proto::CollarError;

use crate::modem::LoraModem;
use crate::spool::Spool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkFrame {
    pub port: u8,
    pub payload: Bytes,
}

impl UplinkFrame {
    pub fn new(port: u8, payload: impl Into<Bytes>) -> Self {
        Self { port, payload: payload.into() }
    }
}

#[derive(Debug, Clone)]
pub struct LinkHealth {
    pub rtt_ms: Option<u32>,
    pub quality: u8, // 0-100
    pub consecutive_failures: u32,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self { rtt_ms: None, quality: 100, consecutive_failures: 0 }
    }
}

impl LinkHealth {
    fn on_success(&mut self, rtt_ms: u32) {
        self.rtt_ms = Some(rtt_ms);
        self.consecutive_failures = 0;
        self.quality = (self.quality + 10).min(100);
    }

    fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        self.quality = self.quality.saturating_sub(20);
    }

    /// Exponential backoff after failures, capped at 10 minutes.
    pub fn retry_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let secs = 30u64 << self.consecutive_failures.min(4);
        Duration::from_secs(secs.min(600))
    }
}

pub struct Uplink<S> {
    modem: LoraModem<S>,
    spool: Spool,
    health: LinkHealth,
    retry_at: Option<Instant>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Uplink<S> {
    pub fn new(modem: LoraModem<S>, spool: Spool) -> Self {
        Self { modem, spool, health: LinkHealth::default(), retry_at: None }
    }

    pub fn link_health(&self) -> &LinkHealth {
        &self.health
    }

    fn backing_off(&self) -> bool {
        self.retry_at.is_some_and(|t| Instant::now() < t)
    }

    /// Sends a frame, spooling it when the modem refuses or the link is backing off.
    pub async fn send(&mut self, frame: UplinkFrame) -> Result<()> {
        if self.backing_off() {
            return self.spool.write(&frame).await;
        }
        match self.transmit(&frame).await {
            Ok(()) => {
                // link is up again, drain what piled up
                if let Err(e) = self.flush_spool().await {
                    warn!("uplink: spool flush stopped: {:#}", e);
                }
                Ok(())
            }
            Err(e) => {
                self.spool.write(&frame).await?;
                Err(e)
            }
        }
    }

    pub async fn flush_spool(&mut self) -> Result<()> {
        for (path, _) in self.spool.entries().await? {
            let Some(frame) = self.spool.read(&path).await? else {
                self.spool.remove(&path).await;
                continue;
            };
            // keep it for retry on failure
            self.transmit(&frame).await?;
            self.spool.remove(&path).await;
        }
        Ok(())
    }

    /// Retries spooled frames once the backoff window has passed.
    pub async fn retry_due(&mut self) -> Result<()> {
        if self.retry_at.is_none() || self.backing_off() {
            return Ok(());
        }
        self.flush_spool().await
    }

    pub async fn poll_downlink(&mut self, wait: Duration) -> Result<Option<UplinkFrame>> {
        self.modem.poll_downlink(wait).await
    }

    async fn transmit(&mut self, frame: &UplinkFrame) -> Result<()> {
        let start = Instant::now();
        match self.modem.send(frame).await {
            Ok(()) => {
                let rtt = start.elapsed().as_millis() as u32;
                self.health.on_success(rtt);
                self.retry_at = None;
                info!("uplink: sent {} bytes on port {} (RTT: {}ms, quality: {}%)", frame.payload.len(), frame.port, rtt, self.health.quality);
                Ok(())
            }
            Err(e) => {
                self.health.on_failure();
                self.retry_at = Some(Instant::now() + self.health.retry_delay());
                warn!(
                    "uplink: send failed (failures: {}, quality: {}%): {:#}",
                    self.health.consecutive_failures, self.health.quality, e
                );
                Err(e)
            }
        }
    }
}

/// `Radio` handed to the control loop: frames go to the uplink task through a
/// bounded queue and never block the tick.
pub struct ChannelRadio {
    frames: mpsc::Sender<UplinkFrame>,
    downlink: mpsc::Receiver<UplinkFrame>,
}

/// Uplink task side of a `ChannelRadio`.
pub struct RadioLink {
    pub frames: mpsc::Receiver<UplinkFrame>,
    pub downlink: mpsc::Sender<UplinkFrame>,
}

pub fn channel_radio(depth: usize) -> (ChannelRadio, RadioLink) {
    let (frames_tx, frames_rx) = mpsc::channel(depth);
    let (down_tx, down_rx) = mpsc::channel(depth);
    (
        ChannelRadio { frames: frames_tx, downlink: down_rx },
        RadioLink { frames: frames_rx, downlink: down_tx },
    )
}

impl Radio for ChannelRadio {
    fn send_packet(&mut self, port: u8, payload: &[u8]) -> Result<(), CollarError> {
        self.frames
            .try_send(UplinkFrame::new(port, Bytes::copy_from_slice(payload)))
            .map_err(|e| CollarError::unavailable(format!("uplink queue: {}", e)))
    }

    fn poll_downlink(&mut self) -> Option<(u8, Vec<u8>)> {
        self.downlink.try_recv().ok().map(|f| (f.port, f.payload.to_vec()))
    }
}

/// Uplink task: forwards queued frames to the modem and relays downlinks back.
pub async fn run<S: AsyncRead + AsyncWrite + Unpin>(mut uplink: Uplink<S>, mut link: RadioLink) -> Result<()> {
    let idle = Duration::from_millis(200);
    loop {
        match tokio::time::timeout(idle, link.frames.recv()).await {
            Ok(Some(frame)) => {
                // failures are spooled and retried; nothing to do here
                uplink.send(frame).await.ok();
            }
            Ok(None) => {
                info!("uplink: radio queue closed");
                return Ok(());
            }
            Err(_) => {
                uplink.retry_due().await.ok();
            }
        }

        while let Some(frame) = uplink.poll_downlink(Duration::from_millis(5)).await? {
            if link.downlink.send(frame).await.is_err() {
                return Ok(());
            }
        }
    }
}
