use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use orbtrack_common::{ObserverLocation, TickSnapshot, OBSERVERS_FILE, SNAPSHOT_FILE, TELEMETRY_FILE};

use super::track::TelemetryLog;

/// What a telemetry publish did to the CSV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryWrite {
    Rewritten(usize),
    Appended(usize),
    Unchanged,
}

/// Writes committed tick results into the output directory
pub struct SnapshotPublisher {
    output_dir: PathBuf,
    /// (log generation, records already in the CSV file)
    telemetry_cursor: Option<(u64, usize)>,
}

impl SnapshotPublisher {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            telemetry_cursor: None,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn ensure_output_dir(&self) -> Result<()> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)
                .await
                .context("Failed to create output directory")?;
            info!("Created output directory: {:?}", self.output_dir);
        }
        Ok(())
    }

    /// Readers only ever see a complete file: write beside it, then rename over it
    async fn write_atomic(&self, file_name: &str, content: &[u8]) -> Result<()> {
        let target = self.output_dir.join(file_name);
        let temp = self.output_dir.join(format!(".{}.tmp", file_name));

        fs::write(&temp, content)
            .await
            .with_context(|| format!("Failed to write {:?}", temp))?;
        fs::rename(&temp, &target)
            .await
            .with_context(|| format!("Failed to replace {:?}", target))?;
        Ok(())
    }

    pub async fn publish_snapshot(&self, snapshot: &TickSnapshot) -> Result<()> {
        let content = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        self.write_atomic(SNAPSHOT_FILE, &content).await
    }

    /// Append the records logged since the last publish; rewrite the file only
    /// on the first publish or after the log was cleared
    pub async fn publish_telemetry(&mut self, log: &TelemetryLog) -> Result<TelemetryWrite> {
        let target = self.output_dir.join(TELEMETRY_FILE);
        let written = match self.telemetry_cursor {
            Some((generation, rows))
                if generation == log.generation() && rows <= log.len() && target.exists() =>
            {
                rows
            }
            _ => {
                let content = log.to_csv()?;
                self.write_atomic(TELEMETRY_FILE, content.as_bytes()).await?;
                self.telemetry_cursor = Some((log.generation(), log.len()));
                return Ok(TelemetryWrite::Rewritten(log.len()));
            }
        };

        if written == log.len() {
            return Ok(TelemetryWrite::Unchanged);
        }

        let rows = log.csv_rows_from(written)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&target)
            .await
            .with_context(|| format!("Failed to open {:?}", target))?;
        file.write_all(rows.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {:?}", target))?;
        file.flush().await?;

        self.telemetry_cursor = Some((log.generation(), log.len()));
        Ok(TelemetryWrite::Appended(log.len() - written))
    }

    pub async fn publish_observers(&self, observers: &[ObserverLocation]) -> Result<()> {
        let content = serde_json::to_vec_pretty(observers).context("Failed to serialize observers")?;
        self.write_atomic(OBSERVERS_FILE, &content).await
    }

    /// Publish everything a tick produced
    pub async fn publish(
        &mut self,
        snapshot: &TickSnapshot,
        log: &TelemetryLog,
        observers: &[ObserverLocation],
    ) -> Result<()> {
        self.ensure_output_dir().await?;
        self.publish_snapshot(snapshot).await?;
        self.publish_telemetry(log).await?;
        self.publish_observers(observers).await?;
        debug!("Published tick {} to {:?}", snapshot.tick, self.output_dir);
        Ok(())
    }

    /// Last published snapshot, if any
    pub async fn load_snapshot(&self) -> Result<Option<TickSnapshot>> {
        let path = self.output_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            debug!("Snapshot file does not exist: {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .context("Failed to read snapshot file")?;
        let snapshot = serde_json::from_str(&content).context("Failed to parse snapshot file")?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut publisher = SnapshotPublisher::new(temp_dir.path().join("data"));
        assert!(publisher.load_snapshot().await.unwrap().is_none());

        let snapshot = TickSnapshot {
            tick: 3,
            instant: Some(chrono::Utc::now()),
            warnings: vec!["element set acquisition failed".to_string()],
            ..Default::default()
        };
        let observers = vec![ObserverLocation::new("New York", 40.7128, -74.0060, 10.0)];

        publisher
            .publish(&snapshot, &TelemetryLog::new(), &observers)
            .await
            .unwrap();

        let loaded = publisher.load_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let csv = std::fs::read_to_string(publisher.output_dir().join(TELEMETRY_FILE)).unwrap();
        assert!(csv.starts_with("objectId,timestamp,"));

        let saved: Vec<ObserverLocation> = serde_json::from_str(
            &std::fs::read_to_string(publisher.output_dir().join(OBSERVERS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(saved, observers);

        // No temp files left behind
        let leftovers = std::fs::read_dir(publisher.output_dir())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    fn record(object_id: u32, second: i64) -> orbtrack_common::LogRecord {
        let instant = chrono::DateTime::from_timestamp(1_700_000_000 + second, 0).unwrap();
        let state = orbtrack_common::StateVector {
            instant,
            position_km: [6778.0, 0.0, 0.0],
            velocity_km_s: [0.0, 7.67, 0.0],
            epoch_offset_minutes: 0.0,
        };
        let point = orbtrack_common::GeodeticPoint {
            instant,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_km: 400.0,
        };
        orbtrack_common::LogRecord::new(object_id, &state, &point)
    }

    #[tokio::test]
    async fn test_telemetry_appends_only_new_rows() {
        let temp_dir = TempDir::new().unwrap();
        let mut publisher = SnapshotPublisher::new(temp_dir.path());
        let path = temp_dir.path().join(TELEMETRY_FILE);
        let mut log = TelemetryLog::new();
        log.append(record(25544, 0)).unwrap();

        assert_eq!(publisher.publish_telemetry(&log).await.unwrap(), TelemetryWrite::Rewritten(1));
        assert_eq!(publisher.publish_telemetry(&log).await.unwrap(), TelemetryWrite::Unchanged);

        log.append(record(25544, 1)).unwrap();
        log.append(record(43017, 1)).unwrap();
        assert_eq!(publisher.publish_telemetry(&log).await.unwrap(), TelemetryWrite::Appended(2));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), log.to_csv().unwrap());

        // A cleared log starts the file over, even once it has grown back
        log.clear();
        for second in 2..6 {
            log.append(record(25544, second)).unwrap();
        }
        assert_eq!(publisher.publish_telemetry(&log).await.unwrap(), TelemetryWrite::Rewritten(4));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), log.to_csv().unwrap());
    }
}
