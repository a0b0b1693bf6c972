//! Append-only JSON-lines persistence of every cycle's telemetry snapshot
//! (SPEC_FULL.md §6): one line per cycle, each line a JSON array of that
//! cycle's [`TimestampBucket`]s. Per SPEC_FULL.md §5's resource policy the
//! file is opened and closed on every cycle rather than held open for the
//! engine's lifetime, so a crash mid-cycle never leaves a dangling
//! descriptor or a torn write straddling process restarts.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::telemetry::TimestampBucket;

pub struct LogWriter {
    path: PathBuf,
}

impl LogWriter {
    /// Validates the path is writable up front (so a startup misconfiguration
    /// surfaces as an `AppError` immediately) and keeps only the path for
    /// subsequent per-cycle open/write/close cycles.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| AppError::Sink(format!("cannot open log file {}: {e}", path.display())))?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub async fn write_cycle(&mut self, buckets: &[TimestampBucket]) -> Result<(), AppError> {
        if buckets.is_empty() {
            return Ok(());
        }
        let mut line = serde_json::to_string(buckets).map_err(|e| AppError::Sink(format!("serialize failed: {e}")))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::Sink(format!("cannot open log file {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::Sink(format!("write failed: {e}")))?;
        file.shutdown().await.map_err(|e| AppError::Sink(format!("close failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TelemetryPoint, TelemetryValue};
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn writes_one_json_line_per_cycle() {
        let tmp = NamedTempFile::new().unwrap();
        let mut writer = LogWriter::open(tmp.path()).await.unwrap();
        let buckets = vec![TimestampBucket {
            timestamp: 1.0,
            points: vec![TelemetryPoint { name: "donatello.vcu_state".into(), timestamp: 1.0, value: TelemetryValue::String("idle".into()) }],
        }];
        writer.write_cycle(&buckets).await.unwrap();
        writer.write_cycle(&buckets).await.unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let parsed: Vec<TimestampBucket> = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed, buckets);
    }

    #[tokio::test]
    async fn empty_snapshot_writes_nothing() {
        let tmp = NamedTempFile::new().unwrap();
        let mut writer = LogWriter::open(tmp.path()).await.unwrap();
        writer.write_cycle(&[]).await.unwrap();
        drop(writer);
        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn reopens_the_file_on_every_write() {
        let tmp = NamedTempFile::new().unwrap();
        let mut writer = LogWriter::open(tmp.path()).await.unwrap();
        let buckets = vec![TimestampBucket { timestamp: 2.0, points: Vec::new() }];
        writer.write_cycle(&buckets).await.unwrap();
        drop(writer);

        // A second writer constructed from the same path picks up right
        // where the first left off -- nothing is held open across cycles.
        let mut writer = LogWriter::open(tmp.path()).await.unwrap();
        writer.write_cycle(&buckets).await.unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
