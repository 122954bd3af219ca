//! Counters for one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Counts of what each stage consumed, produced and dropped.
///
/// Threaded through the pipeline as `&mut RunLog`; stages never keep
/// counts of their own.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    stats: RunStats,
}

/// Plain counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Raw files read into chunks
    pub chunks_read: u64,
    /// Raw files or rows that could not be parsed
    pub chunks_skipped: u64,
    pub rows_skipped: u64,
    /// Chunks dropped as overlapping duplicates
    pub chunks_redundant: u64,
    pub streams_built: u64,
    pub activities_loaded: u64,
    pub activities_skipped: u64,
    pub groups_built: u64,
    /// Groups with no overlapping recording
    pub groups_unmatched: u64,
    pub slices_labeled: u64,
    /// Slices no logged activity overlaps
    pub slices_unknown: u64,
    pub windows_emitted: u64,
    pub windows_empty: u64,
    pub rows_train: u64,
    pub rows_test: u64,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stats: RunStats::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_chunk_read(&mut self) {
        self.stats.chunks_read += 1;
    }

    pub fn record_chunk_skipped(&mut self) {
        self.stats.chunks_skipped += 1;
    }

    pub fn record_row_skipped(&mut self) {
        self.stats.rows_skipped += 1;
    }

    pub fn record_chunk_redundant(&mut self) {
        self.stats.chunks_redundant += 1;
    }

    pub fn record_stream_built(&mut self) {
        self.stats.streams_built += 1;
    }

    pub fn record_activity_loaded(&mut self) {
        self.stats.activities_loaded += 1;
    }

    pub fn record_activity_skipped(&mut self) {
        self.stats.activities_skipped += 1;
    }

    pub fn record_group_built(&mut self) {
        self.stats.groups_built += 1;
    }

    pub fn record_group_unmatched(&mut self) {
        self.stats.groups_unmatched += 1;
    }

    pub fn record_slice(&mut self, known: bool) {
        if known {
            self.stats.slices_labeled += 1;
        } else {
            self.stats.slices_unknown += 1;
        }
    }

    pub fn record_windows(&mut self, emitted: u64, empty: u64) {
        self.stats.windows_emitted += emitted;
        self.stats.windows_empty += empty;
    }

    pub fn record_split(&mut self, train: u64, test: u64) {
        self.stats.rows_train = train;
        self.stats.rows_test = test;
    }

    /// Get the current statistics.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = &self.stats;
        format!(
            "Run {}:\n\
             - Chunks read: {} (skipped {}, redundant {}, bad rows {})\n\
             - Streams built: {}\n\
             - Activities loaded: {} (skipped {})\n\
             - Activity groups: {} (unmatched {})\n\
             - Slices labeled: {} (unknown {})\n\
             - Windows emitted: {} (empty {})\n\
             - Rows: {} train / {} test",
            self.run_id,
            s.chunks_read,
            s.chunks_skipped,
            s.chunks_redundant,
            s.rows_skipped,
            s.streams_built,
            s.activities_loaded,
            s.activities_skipped,
            s.groups_built,
            s.groups_unmatched,
            s.slices_labeled,
            s.slices_unknown,
            s.windows_emitted,
            s.windows_empty,
            s.rows_train,
            s.rows_test,
        )
    }

    /// Write the statistics as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedRun {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats: self.stats.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        std::fs::write(path, json)
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Format written by [`RunLog::save`].
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_counting() {
        let mut log = RunLog::new();

        log.record_chunk_read();
        log.record_chunk_read();
        log.record_chunk_redundant();
        log.record_slice(true);
        log.record_slice(false);
        log.record_windows(10, 2);
        log.record_windows(5, 0);

        let stats = log.stats();
        assert_eq!(stats.chunks_read, 2);
        assert_eq!(stats.chunks_redundant, 1);
        assert_eq!(stats.slices_labeled, 1);
        assert_eq!(stats.slices_unknown, 1);
        assert_eq!(stats.windows_emitted, 15);
        assert_eq!(stats.windows_empty, 2);
    }

    #[test]
    fn test_summary_format() {
        let log = RunLog::new();
        let summary = log.summary();

        assert!(summary.contains("Chunks read"));
        assert!(summary.contains("Windows emitted"));
        assert!(summary.contains(&log.run_id().to_string()));
    }

    #[test]
    fn test_save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.json");

        let mut log = RunLog::new();
        log.record_split(7, 3);
        log.save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["stats"]["rows_train"], 7);
        assert_eq!(value["stats"]["rows_test"], 3);
        assert_eq!(value["run_id"], log.run_id().to_string());
    }
}
