///! Append-only telemetry log and its CSV export
use anyhow::Context;
use orbtrack_common::{CatalogId, LogRecord};
use thiserror::Error;

pub const CSV_COLUMNS: [&str; 11] = [
    "objectId", "timestamp", "px", "py", "pz", "vx", "vy", "vz", "lat", "lon", "altitude",
];

#[derive(Debug, Error, PartialEq)]
pub enum TelemetryError {
    #[error("record for object {object_id} at {timestamp} sorts before the last logged record")]
    OutOfOrder {
        object_id: CatalogId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// One record per object per tick, ordered by (timestamp, object id)
#[derive(Debug, Default, Clone)]
pub struct TelemetryLog {
    records: Vec<LogRecord>,
    /// Bumped by `clear`, so exporters can tell a reset log from a grown one
    generation: u64,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `append` would take `record`
    pub fn accepts(&self, record: &LogRecord) -> bool {
        self.records
            .last()
            .is_none_or(|last| record.sort_key() >= last.sort_key())
    }

    pub fn append(&mut self, record: LogRecord) -> Result<(), TelemetryError> {
        if !self.accepts(&record) {
            return Err(TelemetryError::OutOfOrder {
                object_id: record.object_id,
                timestamp: record.timestamp,
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn export_all(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Full log as CSV, header included even when empty
    pub fn to_csv(&self) -> anyhow::Result<String> {
        self.render(0, true)
    }

    /// Records from index `from` onward as CSV rows, without header
    pub fn csv_rows_from(&self, from: usize) -> anyhow::Result<String> {
        self.render(from, false)
    }

    fn render(&self, from: usize, header: bool) -> anyhow::Result<String> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        if header {
            writer.write_record(CSV_COLUMNS)?;
        }
        for record in self.records.iter().skip(from) {
            writer.serialize(record).context("Failed to serialize telemetry record")?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }
}
