//! Fusing raw chunks into continuous streams.
//!
//! Chunks are ordered by start and scanned once. A chunk continues the
//! current stream when the gap after the previous accepted chunk lies in
//! `[min_gap, time_threshold]`. Larger gaps are recording breaks and start a
//! new stream; smaller gaps (including overlaps) mark redundant fragments,
//! which are dropped.

use crate::config::MergeConfig;
use crate::core::time::{stream_key, to_chrono};
use crate::report::RunLog;
use crate::source::types::{Chunk, Sample};
use chrono::{DateTime, Duration, FixedOffset};
use tracing::{debug, info};

/// Span of one chunk inside a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub name: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// A maximal run of merged chunks.
#[derive(Debug, Clone)]
pub struct Stream {
    device: String,
    samples: Vec<Sample>,
    chunks: Vec<ChunkSpan>,
}

impl Stream {
    /// Wrap already-continuous samples (e.g. a stream file read back from
    /// disk). Returns `None` when there are no samples.
    pub fn from_samples(mut samples: Vec<Sample>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by_key(|s| s.timestamp);
        let span = ChunkSpan {
            name: String::new(),
            start: samples[0].timestamp,
            end: samples[samples.len() - 1].timestamp,
        };
        Some(Self {
            device: String::new(),
            samples,
            chunks: vec![span],
        })
    }

    fn from_chunk(chunk: Chunk) -> Self {
        let span = ChunkSpan {
            name: chunk.name.clone(),
            start: chunk.start(),
            end: chunk.end(),
        };
        Self {
            device: String::new(),
            samples: chunk.into_samples(),
            chunks: vec![span],
        }
    }

    fn append(&mut self, chunk: Chunk) {
        self.chunks.push(ChunkSpan {
            name: chunk.name.clone(),
            start: chunk.start(),
            end: chunk.end(),
        });
        self.samples.extend(chunk.into_samples());
    }

    /// Tag the stream with the device that recorded it.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Recording device, empty when unknown.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Constituent chunks in merge order.
    pub fn chunks(&self) -> &[ChunkSpan] {
        &self.chunks
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.samples[0].timestamp
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.samples[self.samples.len() - 1].timestamp
    }

    pub fn duration(&self) -> Duration {
        self.end() - self.start()
    }

    /// `<start>_<end>` with both stamps floored to the minute.
    pub fn key(&self) -> String {
        stream_key(self.start(), self.end())
    }

    /// Gaps between consecutive constituent chunks.
    pub fn gaps(&self) -> Vec<Duration> {
        self.chunks
            .windows(2)
            .map(|pair| pair[1].start - pair[0].end)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Merges chunks of one source into streams.
#[derive(Debug, Clone, Copy)]
pub struct StreamMerger {
    time_threshold: Duration,
    min_gap: Duration,
}

impl StreamMerger {
    pub fn new(time_threshold: Duration, min_gap: Duration) -> Self {
        Self {
            time_threshold,
            min_gap,
        }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self::new(to_chrono(config.time_threshold), to_chrono(config.min_gap))
    }

    /// Merge `chunks` into streams ordered by start.
    pub fn merge(&self, mut chunks: Vec<Chunk>, log: &mut RunLog) -> Vec<Stream> {
        chunks.sort_by(|a, b| {
            a.sort_key()
                .cmp(&b.sort_key())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut streams = Vec::new();
        let mut current: Option<Stream> = None;

        for chunk in chunks {
            let Some(stream) = current.as_mut() else {
                current = Some(Stream::from_chunk(chunk));
                continue;
            };

            let gap = chunk.start() - stream.end();
            if gap > self.time_threshold {
                debug!(
                    "break before {} (gap {} ms)",
                    chunk.name,
                    gap.num_milliseconds()
                );
                streams.extend(current.replace(Stream::from_chunk(chunk)));
            } else if gap < self.min_gap {
                debug!(
                    "dropping redundant fragment {} (gap {} ms)",
                    chunk.name,
                    gap.num_milliseconds()
                );
                log.record_chunk_redundant();
            } else {
                stream.append(chunk);
            }
        }
        streams.extend(current);

        for stream in &streams {
            log.record_stream_built();
            info!(
                "Stream {}: {} chunks, {} samples",
                stream.key(),
                stream.chunks().len(),
                stream.len()
            );
        }

        streams
    }
}
