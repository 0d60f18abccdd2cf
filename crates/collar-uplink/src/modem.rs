use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use collar_proto::payload::MAX_PAYLOAD_LEN;

use crate::UplinkFrame;

/// LoRa modem speaking a line-based AT dialect:
///
/// ```text
/// > AT+SEND=<port>:<HEX>      < OK | +ERR=<reason>
/// < +RX=<port>:<HEX>          (unsolicited downlink)
/// ```
pub struct LoraModem<S> {
    io: BufReader<S>,
    timeout: Duration,
    received: VecDeque<UplinkFrame>,
    /// Bytes of a line still in flight when the last read timed out.
    partial: Vec<u8>,
}

impl LoraModem<SerialStream> {
    pub fn open(dev: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open lora modem {}", dev))?;
        Ok(Self::new(port, timeout))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> LoraModem<S> {
    pub fn new(io: S, timeout: Duration) -> Self {
        Self { io: BufReader::new(io), timeout, received: VecDeque::new(), partial: Vec::new() }
    }

    pub async fn send(&mut self, frame: &UplinkFrame) -> Result<()> {
        anyhow::ensure!(
            frame.payload.len() <= MAX_PAYLOAD_LEN,
            "payload {} bytes exceeds {}",
            frame.payload.len(),
            MAX_PAYLOAD_LEN
        );
        self.command(&format!("AT+SEND={}:{}", frame.port, hex::encode_upper(&frame.payload)))
            .await
    }

    /// Writes one command and waits for its final response.
    pub async fn command(&mut self, cmd: &str) -> Result<()> {
        self.io.write_all(cmd.as_bytes()).await?;
        self.io.write_all(b"\r\n").await?;
        self.io.flush().await?;

        loop {
            let line = match self.read_line(self.timeout).await? {
                Some(l) => l,
                None => bail!("modem timeout after {:?} on {}", self.timeout, cmd),
            };
            if line == "OK" {
                return Ok(());
            }
            if line.starts_with("+ERR") || line.starts_with("ERROR") {
                bail!("modem rejected {}: {}", cmd, line);
            }
            if !self.take_unsolicited(&line) {
                debug!(line, "modem chatter");
            }
        }
    }

    /// Next downlink frame, waiting at most `wait` for one to arrive.
    pub async fn poll_downlink(&mut self, wait: Duration) -> Result<Option<UplinkFrame>> {
        if let Some(f) = self.received.pop_front() {
            return Ok(Some(f));
        }
        if let Some(line) = self.read_line(wait).await? {
            self.take_unsolicited(&line);
        }
        Ok(self.received.pop_front())
    }

    async fn read_line(&mut self, wait: Duration) -> Result<Option<String>> {
        loop {
            // read_until keeps partial bytes in `partial` when the timeout fires
            match tokio::time::timeout(wait, self.io.read_until(b'\n', &mut self.partial)).await {
                Err(_) => return Ok(None),
                Ok(r) => {
                    if r.context("read lora modem")? == 0 {
                        bail!("lora modem closed");
                    }
                }
            }
            if self.partial.last() != Some(&b'\n') {
                continue;
            }
            let line = String::from_utf8_lossy(&self.partial).trim().to_string();
            self.partial.clear();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn take_unsolicited(&mut self, line: &str) -> bool {
        let Some(rest) = line.strip_prefix("+RX=") else { return false };
        match parse_rx(rest) {
            Some(frame) => {
                debug!(port = frame.port, len = frame.payload.len(), "downlink received");
                self.received.push_back(frame);
            }
            None => debug!(line, "malformed downlink"),
        }
        true
    }
}

fn parse_rx(s: &str) -> Option<UplinkFrame> {
    let (port, data) = s.split_once(':')?;
    let port: u8 = port.trim().parse().ok()?;
    let payload = hex::decode(data.trim()).ok()?;
    Some(UplinkFrame { port, payload: Bytes::from(payload) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_encodes_hex_and_collects_downlink() {
        let (ours, theirs) = duplex(1024);
        let mut modem = LoraModem::new(ours, Duration::from_millis(500));

        let fake = tokio::spawn(async move {
            let mut io = BufReader::new(theirs);
            let mut line = String::new();
            io.read_line(&mut line).await.unwrap();
            io.write_all(b"+RX=2:0304\r\nOK\r\n").await.unwrap();
            line
        });

        modem.send(&UplinkFrame::new(1, vec![0xAB, 0x01])).await.unwrap();
        assert_eq!(fake.await.unwrap().trim(), "AT+SEND=1:AB01");

        let rx = modem.poll_downlink(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(rx.port, 2);
        assert_eq!(&rx.payload[..], &[0x03, 0x04]);
    }

    #[tokio::test]
    async fn error_and_timeout_are_reported() {
        let (ours, theirs) = duplex(1024);
        let mut modem = LoraModem::new(ours, Duration::from_millis(50));
        let fake = tokio::spawn(async move {
            let mut io = BufReader::new(theirs);
            let mut line = String::new();
            io.read_line(&mut line).await.unwrap();
            io.write_all(b"+ERR=busy\r\n").await.unwrap();
            line.clear();
            io.read_line(&mut line).await.unwrap();
            // stay silent for the second command
            io
        });

        let err = modem.send(&UplinkFrame::new(1, vec![1])).await.unwrap_err();
        assert!(err.to_string().contains("busy"));
        let err = modem.send(&UplinkFrame::new(1, vec![2])).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
        drop(fake.await.unwrap());
    }

    #[tokio::test]
    async fn downlink_split_across_polls_is_kept() {
        let (ours, mut theirs) = duplex(1024);
        let mut modem = LoraModem::new(ours, Duration::from_millis(50));

        theirs.write_all(b"+RX=2:03").await.unwrap();
        assert!(modem.poll_downlink(Duration::from_millis(5)).await.unwrap().is_none());

        theirs.write_all(b"04\r\n").await.unwrap();
        let rx = modem.poll_downlink(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(rx.port, 2);
        assert_eq!(&rx.payload[..], &[0x03, 0x04]);
    }

    #[tokio::test]
    async fn oversized_payload_is_refused() {
        let (ours, _theirs) = duplex(64);
        let mut modem = LoraModem::new(ours, Duration::from_millis(10));
        assert!(modem.send(&UplinkFrame::new(1, vec![0; MAX_PAYLOAD_LEN + 1])).await.is_err());
    }
}
