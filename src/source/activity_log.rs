//! Reading the activity log.
//!
//! The log is a CSV with a header row. The columns `Activity Type`,
//! `Started` and `Finished` are required; `ID` and `Updated` are optional.
//! Rows with an empty `Activity Type` are skipped.
//! Every other column is carried through untouched in `source_row`.

use crate::core::time::TimeNormalizer;
use crate::error::{ParseError, PipelineResult, TimeFormat};
use crate::report::RunLog;
use crate::source::types::ActivityInterval;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;
use tracing::{info, warn};

/// Column positions in one log file.
#[derive(Debug, Clone, Copy)]
struct Columns {
    id: Option<usize>,
    activity: usize,
    started: usize,
    finished: usize,
    updated: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord, path: &Path) -> Result<Self, ParseError> {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                ParseError::new(
                    TimeFormat::ActivityLog,
                    path.display().to_string(),
                    format!("missing column '{name}'"),
                )
            })
        };

        Ok(Self {
            id: find("ID"),
            activity: require("Activity Type")?,
            started: require("Started")?,
            finished: require("Finished")?,
            updated: find("Updated"),
        })
    }
}

fn cell(record: &StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Build an interval from one row. `Updated` stands in for a missing
/// `Started` or `Finished`.
fn interval_from_record(
    headers: &StringRecord,
    record: &StringRecord,
    columns: Columns,
    normalizer: &TimeNormalizer,
) -> Result<ActivityInterval, ParseError> {
    let updated = cell(record, columns.updated);
    let missing = |what: &str| {
        ParseError::new(
            TimeFormat::ActivityLog,
            record.iter().collect::<Vec<_>>().join(","),
            format!("no {what} and no Updated time"),
        )
    };

    let started = cell(record, Some(columns.started))
        .or(updated)
        .ok_or_else(|| missing("Started"))?;
    let finished = cell(record, Some(columns.finished))
        .or(updated)
        .ok_or_else(|| missing("Finished"))?;

    let start = normalizer.parse_activity_time(started)?;
    let end = normalizer.parse_activity_time(finished)?;
    if end < start {
        return Err(ParseError::new(
            TimeFormat::ActivityLog,
            format!("{started} .. {finished}"),
            "activity ends before it starts",
        ));
    }

    let activity = cell(record, Some(columns.activity)).ok_or_else(|| {
        ParseError::new(
            TimeFormat::ActivityLog,
            record.iter().collect::<Vec<_>>().join(","),
            "empty Activity Type",
        )
    })?;

    Ok(ActivityInterval {
        id: cell(record, columns.id).unwrap_or_default().to_string(),
        activity: activity.to_string(),
        start,
        end,
        source_row: headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect(),
    })
}

/// Load every usable row of an activity log, in file order.
pub fn read_activity_log(
    path: &Path,
    normalizer: &TimeNormalizer,
    log: &mut RunLog,
) -> PipelineResult<Vec<ActivityInterval>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let columns = Columns::locate(&headers, path)?;

    let mut intervals = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("{}:{}: unreadable row: {e}", path.display(), line + 2);
                log.record_activity_skipped();
                continue;
            }
        };

        match interval_from_record(&headers, &record, columns, normalizer) {
            Ok(interval) => {
                log.record_activity_loaded();
                intervals.push(interval);
            }
            Err(e) => {
                warn!("{}:{}: skipping activity: {e}", path.display(), line + 2);
                log.record_activity_skipped();
            }
        }
    }

    info!(
        "Loaded {} activities from {}",
        intervals.len(),
        path.display()
    );
    Ok(intervals)
}
