//! Reading raw chunk files and merged stream files.
//!
//! Both are header-less CSV with columns `id, timestamp, x, y, z`. Rows that
//! fail to parse are logged and dropped; a file with no usable rows is
//! skipped.

use crate::core::merge::Stream;
use crate::core::time::TimeNormalizer;
use crate::error::PipelineResult;
use crate::report::RunLog;
use crate::source::types::{Chunk, Sample};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// List `*.csv` files directly inside `dir`, sorted by name.
pub fn list_csv_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Directories holding CSV files under `root`, each treated as one device
/// named after its directory. `root` itself counts when it holds CSV files
/// directly; its subdirectories follow in name order.
pub fn device_dirs(root: &Path) -> PipelineResult<Vec<(String, PathBuf)>> {
    let dir_name = |dir: &Path| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "device".to_string())
    };
    let mut devices = Vec::new();

    if !list_csv_files(root)?.is_empty() {
        devices.push((dir_name(root), root.to_path_buf()));
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    for dir in subdirs {
        if !list_csv_files(&dir)?.is_empty() {
            devices.push((dir_name(&dir), dir));
        }
    }

    Ok(devices)
}

/// Read every sample row of a header-less accelerometer CSV.
pub fn read_samples(
    path: &Path,
    normalizer: &TimeNormalizer,
    log: &mut RunLog,
) -> PipelineResult<Vec<Sample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let mut samples = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("{}:{}: unreadable row: {e}", path.display(), line + 1);
                log.record_row_skipped();
                continue;
            }
        };

        // Some exports carry an `ID,Timestamp,X,Y,Z` header
        if line == 0
            && record
                .get(1)
                .is_some_and(|field| field.eq_ignore_ascii_case("timestamp"))
        {
            continue;
        }

        match parse_sample(&record, normalizer) {
            Ok(sample) => samples.push(sample),
            Err(reason) => {
                warn!("{}:{}: skipping row: {reason}", path.display(), line + 1);
                log.record_row_skipped();
            }
        }
    }

    Ok(samples)
}

fn parse_sample(record: &StringRecord, normalizer: &TimeNormalizer) -> Result<Sample, String> {
    if record.len() < 5 {
        return Err(format!("expected 5 columns, found {}", record.len()));
    }
    let record_id = record[0]
        .parse::<u64>()
        .map_err(|e| format!("bad id '{}': {e}", &record[0]))?;
    let timestamp = normalizer
        .parse_sample_timestamp(&record[1])
        .map_err(|e| e.to_string())?;
    let axis = |i: usize| -> Result<f64, String> {
        let value = record[i]
            .parse::<f64>()
            .map_err(|e| format!("bad axis value '{}': {e}", &record[i]))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("non-finite axis value '{}'", &record[i]))
        }
    };

    Ok(Sample::new(record_id, timestamp, axis(2)?, axis(3)?, axis(4)?))
}

/// Read one raw chunk file. Returns `None` when it holds no usable rows.
pub fn read_chunk(
    path: &Path,
    normalizer: &TimeNormalizer,
    log: &mut RunLog,
) -> PipelineResult<Option<Chunk>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let named_start = match normalizer.parse_chunk_filename(&name) {
        Ok(parsed) => Some(parsed.start),
        Err(e) => {
            debug!("ordering {name} by its first sample: {e}");
            None
        }
    };

    let samples = read_samples(path, normalizer, log)?;
    Ok(Chunk::new(name, named_start, samples))
}

/// Read every chunk file in `dir`. Unreadable or empty files are skipped.
pub fn read_chunk_dir(
    dir: &Path,
    normalizer: &TimeNormalizer,
    log: &mut RunLog,
) -> PipelineResult<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for path in list_csv_files(dir)? {
        match read_chunk(&path, normalizer, log) {
            Ok(Some(chunk)) => {
                log.record_chunk_read();
                chunks.push(chunk);
            }
            Ok(None) => {
                warn!("{}: no usable samples, skipping", path.display());
                log.record_chunk_skipped();
            }
            Err(e) => {
                warn!("{}: {e}, skipping", path.display());
                log.record_chunk_skipped();
            }
        }
    }

    Ok(chunks)
}

/// Read merged stream files written by [`crate::export::write_streams`].
///
/// `dir` is either one device's stream folder or a `merge` output holding
/// one subdirectory per device. Streams are tagged with their device. Files
/// whose names do not encode a span are skipped.
pub fn read_stream_dir(
    dir: &Path,
    normalizer: &TimeNormalizer,
    log: &mut RunLog,
) -> PipelineResult<Vec<Stream>> {
    let mut streams = Vec::new();

    for (device, device_dir) in device_dirs(dir)? {
        for path in list_csv_files(&device_dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Err(e) = normalizer.parse_stream_filename(&name) {
                warn!("{e}, skipping");
                log.record_chunk_skipped();
                continue;
            }

            let samples = match read_samples(&path, normalizer, log) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("{}: {e}, skipping", path.display());
                    log.record_chunk_skipped();
                    continue;
                }
            };
            match Stream::from_samples(samples) {
                Some(stream) => streams.push(stream.with_device(device.as_str())),
                None => {
                    warn!("{}: no usable samples, skipping", path.display());
                    log.record_chunk_skipped();
                }
            }
        }
    }

    streams.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.device().cmp(b.device())));
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{format_sample_timestamp, Zone};

    fn normalizer() -> TimeNormalizer {
        TimeNormalizer::new(Zone::fixed_hours(1), Zone::fixed_hours(9))
    }

    #[test]
    fn test_read_chunk_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("user-acc_1716_2024-09-05T09_30_18.064+0100_7610.csv");
        std::fs::write(
            &path,
            "1,2024-09-05T09:30:18.064+0100,0.1,0.2,9.8\n\
             2,not-a-time,0.1,0.2,9.8\n\
             3,2024-09-05T09:30:18.104+0100,0.3,abc,9.7\n\
             4,2024-09-05T09:30:18.144+0100,0.2,0.1,9.9\n",
        )
        .unwrap();

        let mut log = RunLog::new();
        let chunk = read_chunk(&path, &normalizer(), &mut log).unwrap().unwrap();

        assert_eq!(chunk.len(), 2);
        assert_eq!(log.stats().rows_skipped, 2);
        assert_eq!(
            format_sample_timestamp(chunk.sort_key()),
            "2024-09-05T09:30:18.064+0100"
        );
        assert_eq!(chunk.samples()[1].record_id, 4);
    }

    #[test]
    fn test_read_samples_ignores_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("with_header.csv");
        std::fs::write(
            &path,
            "ID,Timestamp,X,Y,Z\n1,2024-09-05T09:30:18.064+0100,0.1,0.2,9.8\n",
        )
        .unwrap();

        let mut log = RunLog::new();
        let samples = read_samples(&path, &normalizer(), &mut log).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(log.stats().rows_skipped, 0);
    }

    #[test]
    fn test_read_chunk_dir_skips_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.csv"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(
            dir.path().join("good.csv"),
            "1,2024-09-05T09:30:18.064+0100,0.1,0.2,9.8\n",
        )
        .unwrap();

        let mut log = RunLog::new();
        let chunks = read_chunk_dir(dir.path(), &normalizer(), &mut log).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "good.csv");
        assert_eq!(log.stats().chunks_read, 1);
        assert_eq!(log.stats().chunks_skipped, 1);
    }

    #[test]
    fn test_device_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("watch_b")).unwrap();
        std::fs::create_dir(root.path().join("watch_a")).unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("watch_a").join("x.csv"), "").unwrap();
        std::fs::write(root.path().join("watch_b").join("y.csv"), "").unwrap();

        let names: Vec<_> = device_dirs(root.path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["watch_a", "watch_b"]);
    }

    #[test]
    fn test_read_stream_dir_walks_device_folders() {
        let root = tempfile::tempdir().unwrap();
        let rows = "1,2024-09-05T10:00:00.000+0100,0.1,0.2,9.8\n\
                    2,2024-09-05T10:00:00.020+0100,0.1,0.2,9.8\n";
        let name = "2024-09-05T10-00+0100_2024-09-05T10-00+0100.csv";
        for device in ["left", "right"] {
            std::fs::create_dir(root.path().join(device)).unwrap();
            std::fs::write(root.path().join(device).join(name), rows).unwrap();
        }

        let mut log = RunLog::new();
        let streams = read_stream_dir(root.path(), &normalizer(), &mut log).unwrap();
        let devices: Vec<_> = streams.iter().map(|s| s.device()).collect();
        assert_eq!(devices, vec!["left", "right"]);
        assert_eq!(streams[0].len(), 2);

        // a single device folder works too
        let left = read_stream_dir(&root.path().join("left"), &normalizer(), &mut log).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].device(), "left");
    }
}
