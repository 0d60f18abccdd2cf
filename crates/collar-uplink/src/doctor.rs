use anyhow::Result;
use std::path::Path;

pub fn check_spool(spool_dir: &str, max_kb: u64) -> Result<()> {
    let p = Path::new(spool_dir);
    if p.exists() {
        anyhow::ensure!(p.is_dir(), "radio.spool_dir is not a dir: {}", spool_dir);
    }
    anyhow::ensure!(max_kb >= 4, "radio.spool_max_kb too small; set >= 4");
    Ok(())
}

pub fn check_modem_timeout(timeout_ms: u64) -> Result<()> {
    anyhow::ensure!((100..=60_000).contains(&timeout_ms), "radio.timeout_ms {} outside 100..=60000", timeout_ms);
    Ok(())
}

pub fn check_tx_intervals(intervals_ms: &[u32]) -> Result<()> {
    anyhow::ensure!(intervals_ms.iter().all(|&ms| ms >= 1_000), "radio.tx_interval_ms entries must be >= 1000");
    Ok(())
}
