//! Fixed-schema records read from raw recordings and the activity log.
//!
//! Every record is validated when it is built; later stages never see a
//! half-parsed row.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// One accelerometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Value of the raw `id` column, kept so streams can be written back
    pub record_id: u64,
    /// Instant in the run's reference zone
    pub timestamp: DateTime<FixedOffset>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(record_id: u64, timestamp: DateTime<FixedOffset>, x: f64, y: f64, z: f64) -> Self {
        Self {
            record_id,
            timestamp,
            x,
            y,
            z,
        }
    }

    /// Euclidean norm of the acceleration vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Samples read from one raw file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// File the samples came from
    pub name: String,
    /// Instant encoded in the filename, when it has one
    pub named_start: Option<DateTime<FixedOffset>>,
    samples: Vec<Sample>,
}

impl Chunk {
    /// Build a chunk, ordering samples by time. Returns `None` when there
    /// are no samples.
    pub fn new(
        name: impl Into<String>,
        named_start: Option<DateTime<FixedOffset>>,
        mut samples: Vec<Sample>,
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by_key(|s| s.timestamp);
        Some(Self {
            name: name.into(),
            named_start,
            samples,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// First sample instant.
    pub fn start(&self) -> DateTime<FixedOffset> {
        self.samples[0].timestamp
    }

    /// Last sample instant.
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.samples[self.samples.len() - 1].timestamp
    }

    /// Ordering key: the filename instant if present, else the first sample.
    pub fn sort_key(&self) -> DateTime<FixedOffset> {
        self.named_start.unwrap_or_else(|| self.start())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A logged activity with normalized endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInterval {
    /// Value of the log's `ID` column
    pub id: String,
    /// Value of the log's `Activity Type` column
    pub activity: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// The original row as `(header, value)` pairs
    pub source_row: Vec<(String, String)>,
}

impl ActivityInterval {
    /// Whether this interval strictly overlaps `[start, end)`.
    pub fn overlaps(&self, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> bool {
        self.start < end && self.end > start
    }
}
