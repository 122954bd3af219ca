//! Writing pipeline artifacts to disk.
//!
//! Sample files share the raw chunk layout (`id, timestamp, x, y, z`, no
//! header) with timestamps rewritten in the reference zone, so merged
//! streams and window files can be read back by the same reader.

use crate::core::dataset::DatasetRow;
use crate::core::features::FEATURE_NAMES;
use crate::core::matching::MatchedSource;
use crate::core::merge::Stream;
use crate::core::time::{format_sample_timestamp, stream_key};
use crate::core::windowing::WindowSplitter;
use crate::error::PipelineResult;
use crate::source::types::Sample;
use csv::WriterBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the label column in feature tables.
pub const LABEL_COLUMN: &str = "Activity";

/// Write samples as a header-less CSV.
pub fn write_samples(path: &Path, samples: &[Sample]) -> PipelineResult<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    for sample in samples {
        writer.write_record([
            sample.record_id.to_string(),
            format_sample_timestamp(sample.timestamp),
            sample.x.to_string(),
            sample.y.to_string(),
            sample.z.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pick `<stem>.csv`, or `<stem>_<n>.csv` when that name is already taken.
fn unique_file(dir: &Path, stem: &str, taken: &mut BTreeSet<String>) -> PathBuf {
    let mut name = format!("{stem}.csv");
    let mut n = 1;
    while !taken.insert(name.clone()) {
        name = format!("{stem}_{n}.csv");
        n += 1;
    }
    dir.join(name)
}

/// Write each stream to `<dir>/<start>_<end>.csv`.
pub fn write_streams(dir: &Path, streams: &[Stream]) -> PipelineResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut taken = BTreeSet::new();
    let mut paths = Vec::with_capacity(streams.len());

    for stream in streams {
        let path = unique_file(dir, &stream.key(), &mut taken);
        write_samples(&path, stream.samples())?;
        debug!("wrote {} samples to {}", stream.len(), path.display());
        paths.push(path);
    }

    info!("Wrote {} streams to {}", paths.len(), dir.display());
    Ok(paths)
}

/// Write every non-empty window of a stream into
/// `<dir>/<device>/<stream key>/`, one file per window named by the window
/// span and its index. The device level is left out when the stream has
/// none. Returns the number of files written.
pub fn write_stream_windows(
    dir: &Path,
    stream: &Stream,
    splitter: &WindowSplitter,
) -> PipelineResult<usize> {
    let folder = dir.join(stream.device()).join(stream.key());
    std::fs::create_dir_all(&folder)?;

    let mut written = 0;
    for (index, window) in splitter.windows(stream.samples()).enumerate() {
        let name = format!("{}_{index}.csv", stream_key(window.start, window.end));
        write_samples(&folder.join(name), window.samples())?;
        written += 1;
    }

    debug!("{}: {written} window files", folder.display());
    Ok(written)
}

/// Write a matched group into `<dir>/<source key>/`: its activity rows as
/// `TrainActivities_<first id>.csv` and its cropped samples as
/// `<start>_<end>.csv`.
pub fn write_matched_source(dir: &Path, source: &MatchedSource) -> PipelineResult<PathBuf> {
    let folder = dir.join(source.key());
    std::fs::create_dir_all(&folder)?;

    let intervals = &source.group.intervals;
    let headers: Vec<&str> = intervals
        .first()
        .map(|i| i.source_row.iter().map(|(h, _)| h.as_str()).collect())
        .unwrap_or_default();

    let activity_path = folder.join(format!("TrainActivities_{}.csv", source.group.first_id()));
    let mut writer = WriterBuilder::new().from_path(&activity_path)?;
    writer.write_record(&headers)?;
    for interval in intervals {
        let row = headers.iter().map(|header| {
            interval
                .source_row
                .iter()
                .find(|(h, _)| h == header)
                .map(|(_, v)| v.as_str())
                .unwrap_or_default()
        });
        writer.write_record(row)?;
    }
    writer.flush()?;

    if let (Some(first), Some(last)) = (source.samples.first(), source.samples.last()) {
        let name = format!("{}.csv", stream_key(first.timestamp, last.timestamp));
        write_samples(&folder.join(name), &source.samples)?;
    }

    Ok(folder)
}

/// Write a feature table: one column per feature, then the label.
pub fn write_feature_table(path: &Path, rows: &[DatasetRow]) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(FEATURE_NAMES.iter().copied().chain([LABEL_COLUMN]))?;
    for row in rows {
        writer.write_record(
            row.vector
                .values
                .iter()
                .map(f64::to_string)
                .chain([row.vector.label.to_string()]),
        )?;
    }
    writer.flush()?;

    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{FeatureVector, FEATURE_COUNT};
    use crate::core::matching::group_activities;
    use crate::source::types::ActivityInterval;
    use chrono::{DateTime, Duration, FixedOffset, TimeZone};

    fn t(ms: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 9, 5, 9, 30, 0)
            .unwrap()
            + Duration::milliseconds(ms)
    }

    fn stream(from_ms: i64, to_ms: i64) -> Stream {
        let samples = (from_ms..=to_ms)
            .step_by(1_000)
            .enumerate()
            .map(|(i, ms)| Sample::new(i as u64, t(ms), 0.5, -0.25, 9.81))
            .collect();
        Stream::from_samples(samples).unwrap()
    }

    #[test]
    fn test_write_samples_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        write_samples(&path, &[Sample::new(7, t(64), 0.5, -0.25, 9.81)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "7,2024-09-05T09:30:00.064+0100,0.5,-0.25,9.81\n");
    }

    #[test]
    fn test_write_streams_names_by_span() {
        let dir = tempfile::tempdir().unwrap();
        let streams = vec![stream(0, 90_000), stream(10_000, 20_000)];
        let paths = write_streams(dir.path(), &streams).unwrap();

        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names[0], "2024-09-05T09-30+0100_2024-09-05T09-31+0100.csv");
        assert_eq!(names[1], "2024-09-05T09-30+0100_2024-09-05T09-30+0100.csv");

        // same minute-floored span gets a suffix
        let again = write_streams(dir.path(), &[stream(0, 1_000), stream(0, 2_000)]).unwrap();
        assert!(again[1].to_string_lossy().ends_with("_1.csv"));
    }

    #[test]
    fn test_write_stream_windows() {
        let dir = tempfile::tempdir().unwrap();
        let stream = stream(0, 300_000);
        let splitter =
            WindowSplitter::new(Duration::seconds(120), Duration::seconds(60)).unwrap();

        let written = write_stream_windows(dir.path(), &stream, &splitter).unwrap();
        assert_eq!(written, 4);
        let folder = dir.path().join(stream.key());
        assert_eq!(std::fs::read_dir(folder).unwrap().count(), 4);

        let tagged = stream.with_device("watch");
        write_stream_windows(dir.path(), &tagged, &splitter).unwrap();
        assert!(dir.path().join("watch").join(tagged.key()).is_dir());
    }

    #[test]
    fn test_write_matched_source() {
        let dir = tempfile::tempdir().unwrap();
        let interval = ActivityInterval {
            id: "12".to_string(),
            activity: "Walking".to_string(),
            start: t(0),
            end: t(60_000),
            source_row: vec![
                ("ID".to_string(), "12".to_string()),
                ("Activity Type".to_string(), "Walking".to_string()),
            ],
        };
        let group = group_activities(&[interval], Duration::zero()).pop().unwrap();
        let source = MatchedSource {
            group,
            device: "watch".to_string(),
            stream_keys: vec!["k".to_string()],
            samples: stream(0, 60_000).samples().to_vec(),
        };

        let folder = write_matched_source(dir.path(), &source).unwrap();
        assert!(folder
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("watch_2024-09-05T09-30+0100_"));
        let activities = std::fs::read_to_string(folder.join("TrainActivities_12.csv")).unwrap();
        assert_eq!(activities, "ID,Activity Type\n12,Walking\n");
        assert_eq!(std::fs::read_dir(&folder).unwrap().count(), 2);
    }

    #[test]
    fn test_write_feature_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables").join("train_features.csv");
        let rows = vec![DatasetRow {
            id: 0,
            vector: FeatureVector {
                values: [0.5; FEATURE_COUNT],
                label: 3,
                window_start: t(0),
                window_end: t(2_000),
                source: "src".to_string(),
            },
        }];
        write_feature_table(&path, &rows).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header: Vec<_> = lines.next().unwrap().split(',').collect();
        assert_eq!(header.len(), FEATURE_COUNT + 1);
        assert_eq!(header[0], "X_mean");
        assert_eq!(header[FEATURE_COUNT], "Activity");
        assert!(lines.next().unwrap().ends_with(",0.5,3"));
    }
}
