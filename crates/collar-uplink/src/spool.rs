use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::UplinkFrame;

/// Frames the modem could not deliver, one file each, oldest first.
///
/// File layout: port byte followed by the raw payload.
pub struct Spool {
    dir: PathBuf,
    max_bytes: u64,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>, max_kb: u64) -> Self {
        Self { dir: dir.into(), max_bytes: max_kb * 1024 }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(&self, frame: &UplinkFrame) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create spool dir {}", self.dir.display()))?;

        let need = frame.payload.len() as u64 + 1;
        let mut entries = self.entries().await?;
        let mut used: u64 = entries.iter().map(|(_, len)| len).sum();
        while used + need > self.max_bytes && !entries.is_empty() {
            let (oldest, len) = entries.remove(0);
            warn!(file = %oldest.display(), "spool full, dropping oldest frame");
            fs::remove_file(&oldest).await.ok();
            used -= len;
        }

        let name = self
            .dir
            .join(format!("{:024}.bin", time::OffsetDateTime::now_utc().unix_timestamp_nanos()));
        let mut f = fs::File::create(&name).await?;
        f.write_all(&[frame.port]).await?;
        f.write_all(&frame.payload).await?;
        f.flush().await?;
        debug!(file = %name.display(), "frame spooled");
        Ok(())
    }

    /// Spooled files with their sizes, oldest first.
    pub async fn entries(&self) -> Result<Vec<(PathBuf, u64)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut rd = fs::read_dir(&self.dir).await?;
        while let Some(ent) = rd.next_entry().await? {
            let path = ent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let meta = ent.metadata().await?;
            if meta.is_file() {
                out.push((path, meta.len()));
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn read(&self, path: &Path) -> Result<Option<UplinkFrame>> {
        let blob = fs::read(path).await?;
        let Some((&port, payload)) = blob.split_first() else {
            return Ok(None);
        };
        Ok(Some(UplinkFrame { port, payload: Bytes::copy_from_slice(payload) }))
    }

    pub async fn remove(&self, path: &Path) {
        fs::remove_file(path).await.ok();
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    std::env::temp_dir().join(format!("collar-spool-{}-{}-{}", tag, std::process::id(), nanos))
}
