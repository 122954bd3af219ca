//! Timestamp normalization.
//!
//! Raw recordings, merged stream filenames and the activity log each encode
//! time differently and in different zones. Everything is parsed here and
//! converted to one reference zone so later stages compare instants only.

use crate::error::{ParseError, TimeFormat};
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDateTime, Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format of minute-resolution stamps in stream and window filenames.
pub const STREAM_STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M%z";

/// Format of sample timestamps written back to CSV.
pub const SAMPLE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

const ACTIVITY_LOG_FORMAT: &str = "%Y/%m/%d %H:%M";

/// A timezone, either a fixed offset or an IANA zone name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    /// A fixed offset of whole hours east of UTC.
    pub fn fixed_hours(hours: i32) -> Self {
        FixedOffset::east_opt(hours * 3600)
            .map(Zone::Fixed)
            .unwrap_or_else(|| Zone::Fixed(Utc.fix()))
    }

    /// Express an instant in this zone.
    pub fn convert<T: TimeZone>(&self, dt: &DateTime<T>) -> DateTime<FixedOffset> {
        match self {
            Zone::Fixed(offset) => dt.with_timezone(offset),
            Zone::Named(tz) => dt.with_timezone(tz).fixed_offset(),
        }
    }

    /// Attach this zone to a wall-clock time. Ambiguous or skipped local
    /// times (DST transitions in named zones) yield `None`.
    pub fn localize(&self, naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Zone::Fixed(offset) => offset.from_local_datetime(naive).single(),
            Zone::Named(tz) => tz
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.fixed_offset()),
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Fixed(offset) => {
                let secs = offset.local_minus_utc();
                let sign = if secs < 0 { '-' } else { '+' };
                let secs = secs.abs();
                write!(f, "{sign}{:02}{:02}", secs / 3600, (secs % 3600) / 60)
            }
            Zone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(Zone::Fixed(Utc.fix()));
        }
        if let Some(offset) = parse_offset(s) {
            return Ok(Zone::Fixed(offset));
        }
        s.parse::<Tz>()
            .map(Zone::Named)
            .map_err(|e| format!("unknown zone '{s}': {e}"))
    }
}

impl TryFrom<String> for Zone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Zone> for String {
    fn from(zone: Zone) -> Self {
        zone.to_string()
    }
}

/// Parse `+HHMM`, `-HHMM`, `+HH:MM` or `-HH:MM`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Metadata encoded in a raw chunk filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    pub device: String,
    pub id: String,
    pub start: DateTime<FixedOffset>,
}

/// Converts every supported time encoding into the reference zone.
#[derive(Debug, Clone, Copy)]
pub struct TimeNormalizer {
    reference: Zone,
    activity_log: Zone,
}

impl TimeNormalizer {
    pub fn new(reference: Zone, activity_log: Zone) -> Self {
        Self {
            reference,
            activity_log,
        }
    }

    /// The zone all results are expressed in.
    pub fn reference(&self) -> Zone {
        self.reference
    }

    /// Parse `raw` according to `format`. Filename formats return the
    /// (first) instant they encode.
    pub fn normalize(
        &self,
        format: TimeFormat,
        raw: &str,
    ) -> Result<DateTime<FixedOffset>, ParseError> {
        match format {
            TimeFormat::ChunkFilename => self.parse_chunk_filename(raw).map(|name| name.start),
            TimeFormat::StreamFilename => self.parse_stream_filename(raw).map(|(start, _)| start),
            TimeFormat::ActivityLog => self.parse_activity_time(raw),
            TimeFormat::SampleTimestamp => self.parse_sample_timestamp(raw),
        }
    }

    /// Parse an ISO-8601 sample timestamp such as `2024-09-05T09:30:18.064+0100`.
    pub fn parse_sample_timestamp(&self, raw: &str) -> Result<DateTime<FixedOffset>, ParseError> {
        let raw = raw.trim();
        let parsed = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%z"))
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map_err(|e| ParseError::new(TimeFormat::SampleTimestamp, raw, e.to_string()))?;
        Ok(self.reference.convert(&parsed))
    }

    /// Parse a `YYYY/MM/DD HH:MM` activity-log cell written in the log's zone.
    pub fn parse_activity_time(&self, raw: &str) -> Result<DateTime<FixedOffset>, ParseError> {
        let raw = raw.trim();
        let naive = NaiveDateTime::parse_from_str(raw, ACTIVITY_LOG_FORMAT)
            .map_err(|e| ParseError::new(TimeFormat::ActivityLog, raw, e.to_string()))?;
        let local = self.activity_log.localize(&naive).ok_or_else(|| {
            ParseError::new(
                TimeFormat::ActivityLog,
                raw,
                format!("ambiguous or nonexistent local time in {}", self.activity_log),
            )
        })?;
        Ok(self.reference.convert(&local))
    }

    /// Parse `<device>_<id>_<timestamp>_<random>.csv`, where the timestamp's
    /// time-of-day separators may be `_`, `-` or `:`.
    pub fn parse_chunk_filename(&self, filename: &str) -> Result<ChunkName, ParseError> {
        let err = |reason: &str| ParseError::new(TimeFormat::ChunkFilename, filename, reason);

        let stem = strip_csv(filename);
        let mut head = stem.splitn(3, '_');
        let device = head.next().filter(|s| !s.is_empty()).ok_or_else(|| err("missing device"))?;
        let id = head.next().filter(|s| !s.is_empty()).ok_or_else(|| err("missing id"))?;
        let rest = head.next().ok_or_else(|| err("missing timestamp"))?;
        let (stamp, random) = rest.rsplit_once('_').ok_or_else(|| err("missing random suffix"))?;
        if random.is_empty() {
            return Err(err("missing random suffix"));
        }

        let (date, time) = stamp.split_once('T').ok_or_else(|| err("missing 'T' separator"))?;
        let bytes = time.as_bytes();
        if bytes.len() < 8
            || !is_time_separator(bytes[2])
            || !is_time_separator(bytes[5])
        {
            return Err(err("malformed time of day"));
        }
        let iso = format!("{date}T{}:{}:{}", &time[..2], &time[3..5], &time[6..]);
        let start = self
            .parse_sample_timestamp(&iso)
            .map_err(|e| err(&e.reason))?;

        Ok(ChunkName {
            device: device.to_string(),
            id: id.to_string(),
            start,
        })
    }

    /// Parse `<start>_<end>[_suffix...].csv` with minute-resolution stamps.
    pub fn parse_stream_filename(
        &self,
        filename: &str,
    ) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>), ParseError> {
        let stem = strip_csv(filename);
        let mut parts = stem.split('_');
        let (Some(start), Some(end)) = (parts.next(), parts.next()) else {
            return Err(ParseError::new(
                TimeFormat::StreamFilename,
                filename,
                "expected <start>_<end>",
            ));
        };
        let parse = |stamp: &str| {
            DateTime::parse_from_str(stamp, STREAM_STAMP_FORMAT)
                .map(|dt| self.reference.convert(&dt))
                .map_err(|e| ParseError::new(TimeFormat::StreamFilename, filename, e.to_string()))
        };
        let (start, end) = (parse(start)?, parse(end)?);
        if end < start {
            return Err(ParseError::new(
                TimeFormat::StreamFilename,
                filename,
                "end precedes start",
            ));
        }
        Ok((start, end))
    }
}

fn is_time_separator(b: u8) -> bool {
    matches!(b, b'_' | b'-' | b':')
}

fn strip_csv(filename: &str) -> &str {
    filename.strip_suffix(".csv").unwrap_or(filename)
}

/// Drop seconds and sub-seconds.
pub fn floor_to_minute(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    dt - Duration::seconds(i64::from(dt.second()))
        - Duration::nanoseconds(i64::from(dt.nanosecond()))
}

/// Minute-floored `YYYY-MM-DDTHH-MM±HHMM` stamp.
pub fn format_stream_stamp(dt: DateTime<FixedOffset>) -> String {
    floor_to_minute(dt).format(STREAM_STAMP_FORMAT).to_string()
}

/// Key identifying a stream spanning `[start, end]`.
pub fn stream_key(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> String {
    format!("{}_{}", format_stream_stamp(start), format_stream_stamp(end))
}

/// `YYYY-MM-DDTHH:MM:SS.fff±HHMM`.
pub fn format_sample_timestamp(dt: DateTime<FixedOffset>) -> String {
    dt.format(SAMPLE_TIMESTAMP_FORMAT).to_string()
}

/// Convert a std duration to a chrono duration at microsecond precision.
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::microseconds(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
}
