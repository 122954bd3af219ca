//! End-to-end batch runs.
//!
//! [`Pipeline`] wires the stages together from a [`Config`]: raw chunks are
//! merged into streams, activity groups are matched against the streams,
//! slices are labeled, cut into feature windows, and the resulting dataset
//! is split and written out. Each stage is also available on its own for
//! the CLI's single-step commands.

use crate::config::{load_label_map, Config};
use crate::core::dataset::{Dataset, DatasetBuilder, Split};
use crate::core::denoise::Denoiser;
use crate::core::features::FeatureExtractor;
use crate::core::matching::{match_sources, ActivityMatcher, MatchedSource};
use crate::core::merge::{Stream, StreamMerger};
use crate::core::time::{to_chrono, TimeNormalizer};
use crate::core::windowing::WindowSplitter;
use crate::error::{PipelineError, PipelineResult};
use crate::export;
use crate::report::RunLog;
use crate::source::{device_dirs, read_activity_log, read_chunk_dir, read_stream_dir};
use crate::source::types::ActivityInterval;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File names written into the output directory by [`Pipeline::run`].
pub const TRAIN_TABLE: &str = "train_features.csv";
pub const TEST_TABLE: &str = "test_features.csv";
pub const RUN_SUMMARY: &str = "run_summary.json";

/// Where the accelerometer data of a run comes from.
#[derive(Debug, Clone)]
pub enum Recording {
    /// Raw chunk files, one subdirectory per device (or the directory
    /// itself for a single device)
    Raw(PathBuf),
    /// Merged stream files written by a previous `merge`
    Streams(PathBuf),
}

/// Files produced by a full run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_table: PathBuf,
    pub test_table: PathBuf,
    pub summary: PathBuf,
}

/// Assign integer labels to activity names in sorted name order. Used
/// when no label map is configured.
pub fn derive_label_map(intervals: &[ActivityInterval]) -> BTreeMap<String, i32> {
    intervals
        .iter()
        .map(|i| i.activity.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .zip(0..)
        .collect()
}

/// A configured pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    normalizer: TimeNormalizer,
    label_map: Option<BTreeMap<String, i32>>,
}

impl Pipeline {
    /// Build from a validated config, loading the label map if one is set.
    pub fn new(config: Config) -> PipelineResult<Self> {
        config.validate()?;
        let label_map = match &config.label_map_path {
            Some(path) => Some(load_label_map(path)?),
            None => None,
        };
        let normalizer = TimeNormalizer::new(config.reference_zone, config.activity_log_zone);
        Ok(Self {
            config,
            normalizer,
            label_map,
        })
    }

    /// Use `labels` instead of the configured label map.
    pub fn with_label_map(mut self, labels: BTreeMap<String, i32>) -> Self {
        self.label_map = Some(labels);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn normalizer(&self) -> &TimeNormalizer {
        &self.normalizer
    }

    /// Merge the raw chunks of every device under `root`. Each device is
    /// merged on its own and its streams are tagged with the device name;
    /// all streams are returned together, ordered by start then device.
    pub fn merge_raw(&self, root: &Path, log: &mut RunLog) -> PipelineResult<Vec<Stream>> {
        let merger = StreamMerger::from_config(&self.config.merge);
        let mut streams = Vec::new();

        for (device, dir) in device_dirs(root)? {
            let chunks = read_chunk_dir(&dir, &self.normalizer, log)?;
            info!("Device {device}: {} chunks", chunks.len());
            streams.extend(
                merger
                    .merge(chunks, log)
                    .into_iter()
                    .map(|stream| stream.with_device(device.as_str())),
            );
        }

        if streams.is_empty() {
            return Err(PipelineError::NoData(format!(
                "no usable chunks under {}",
                root.display()
            )));
        }
        streams.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.device().cmp(b.device())));
        Ok(streams)
    }

    /// Merge every device under `root` and write its streams to
    /// `<out>/<device>/`. Returns the number of streams written.
    pub fn merge_to_dir(&self, root: &Path, out: &Path, log: &mut RunLog) -> PipelineResult<usize> {
        let mut by_device: BTreeMap<String, Vec<Stream>> = BTreeMap::new();
        for stream in self.merge_raw(root, log)? {
            by_device
                .entry(stream.device().to_string())
                .or_default()
                .push(stream);
        }

        let mut written = 0;
        for (device, streams) in &by_device {
            written += export::write_streams(&out.join(device), streams)?.len();
        }
        Ok(written)
    }

    /// Load the streams of a recording. A stream directory may be a single
    /// device's folder or a `merge` output with one folder per device.
    pub fn load_streams(&self, recording: &Recording, log: &mut RunLog) -> PipelineResult<Vec<Stream>> {
        match recording {
            Recording::Raw(root) => self.merge_raw(root, log),
            Recording::Streams(dir) => {
                let streams = read_stream_dir(dir, &self.normalizer, log)?;
                if streams.is_empty() {
                    return Err(PipelineError::NoData(format!(
                        "no stream files in {}",
                        dir.display()
                    )));
                }
                Ok(streams)
            }
        }
    }

    /// Write the stream windows of every stream in `streams` under
    /// `out/<device>/`.
    pub fn split_streams(&self, streams: &[Stream], out: &Path) -> PipelineResult<usize> {
        let splitter = WindowSplitter::new(
            to_chrono(self.config.stream_windows.length),
            to_chrono(self.config.stream_windows.step),
        )?;
        let mut written = 0;
        for stream in streams {
            written += export::write_stream_windows(out, stream, &splitter)?;
        }
        info!("Wrote {written} window files to {}", out.display());
        Ok(written)
    }

    /// Read the activity log and match its groups against `streams`.
    pub fn match_activities(
        &self,
        streams: &[Stream],
        activity_log: &Path,
        log: &mut RunLog,
    ) -> PipelineResult<(Vec<ActivityInterval>, Vec<MatchedSource>)> {
        let intervals = read_activity_log(activity_log, &self.normalizer, log)?;
        if intervals.is_empty() {
            return Err(PipelineError::NoData(format!(
                "no usable activities in {}",
                activity_log.display()
            )));
        }
        let padding = to_chrono(self.config.matching.group_padding);
        let sources = match_sources(&intervals, streams, padding, log);
        Ok((intervals, sources))
    }

    /// Integer label for a slice's activity. `None` drops the slice.
    fn resolve_label(&self, labels: &BTreeMap<String, i32>, activity: Option<&str>) -> Option<i32> {
        match activity.and_then(|name| labels.get(name)) {
            Some(&label) => Some(label),
            None if self.config.matching.keep_unknown => Some(self.config.matching.unknown_label),
            None => None,
        }
    }

    /// Label, window and featurize every matched source.
    pub fn build_dataset(
        &self,
        mut sources: Vec<MatchedSource>,
        labels: &BTreeMap<String, i32>,
        log: &mut RunLog,
    ) -> PipelineResult<Dataset> {
        let matcher = ActivityMatcher::new(self.config.matching.policy);
        let extractor = FeatureExtractor::new(WindowSplitter::from_overlap(
            to_chrono(self.config.feature_windows.length),
            self.config.feature_windows.overlap,
        )?);
        let denoiser = self
            .config
            .denoise
            .enabled
            .then(|| Denoiser::from_config(&self.config.denoise));

        let mut builder = DatasetBuilder::new();
        for source in &mut sources {
            if let Some(denoiser) = &denoiser {
                denoiser.apply(&mut source.samples);
            }

            let key = source.key();
            for segment in matcher.label_slices(&source.group, &source.samples, log) {
                let Some(label) = self.resolve_label(labels, segment.activity.as_deref()) else {
                    if let Some(name) = &segment.activity {
                        warn!("{key}: activity '{name}' has no label, dropping slice");
                    }
                    continue;
                };
                builder.add(extractor.extract_all(segment.samples, label, &key, log));
            }
        }

        let dataset = builder.build();
        info!(
            "Dataset: {} rows from {} sources",
            dataset.len(),
            sources.len()
        );
        Ok(dataset)
    }

    /// Split a dataset and record the partition sizes.
    pub fn split_dataset(&self, dataset: &Dataset, log: &mut RunLog) -> PipelineResult<Split> {
        let split = dataset.split(self.config.split.test_fraction, self.config.split.seed)?;
        log.record_split(split.train.len() as u64, split.test.len() as u64);
        Ok(split)
    }

    /// Run every stage and write the train and test tables plus the run
    /// summary into the configured output directory.
    pub fn run(
        &self,
        recording: &Recording,
        activity_log: &Path,
        log: &mut RunLog,
    ) -> PipelineResult<RunOutput> {
        let streams = self.load_streams(recording, log)?;
        let (intervals, sources) = self.match_activities(&streams, activity_log, log)?;
        if sources.is_empty() {
            return Err(PipelineError::NoData(
                "no activity group overlaps the recording".to_string(),
            ));
        }

        let labels = match &self.label_map {
            Some(labels) => labels.clone(),
            None => {
                let labels = derive_label_map(&intervals);
                info!("No label map configured; derived {} labels", labels.len());
                labels
            }
        };

        let dataset = self.build_dataset(sources, &labels, log)?;
        let split = self.split_dataset(&dataset, log)?;

        let out = &self.config.output_path;
        std::fs::create_dir_all(out)?;
        let train_table = out.join(TRAIN_TABLE);
        let test_table = out.join(TEST_TABLE);
        export::write_feature_table(&train_table, &split.train)?;
        export::write_feature_table(&test_table, &split.test)?;

        let summary = out.join(RUN_SUMMARY);
        log.save(&summary)?;

        Ok(RunOutput {
            rows: dataset.len(),
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            train_table,
            test_table,
            summary,
        })
    }
}
