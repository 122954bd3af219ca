//! Aligning recordings with the activity log.
//!
//! Log rows that chain end-to-start form an [`ActivityGroup`]. Each group
//! is matched to the streams it overlaps, giving one [`MatchedSource`] per
//! recording device: that device's samples plus the group's ordered
//! activities. Devices are never mixed within a source. The source's time
//! range is then divided into one equal slice per activity, and every slice
//! is labeled by the configured [`MatchPolicy`].

use crate::core::merge::Stream;
use crate::core::time::format_stream_stamp;
use crate::core::windowing::samples_between;
use crate::error::{PipelineError, PipelineResult};
use crate::report::RunLog;
use crate::source::types::{ActivityInterval, Sample};
use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How a slice of a source gets its activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Slice `i` takes the `i`-th activity of the group in log order.
    /// For logs whose per-row times are unreliable.
    Proportional,
    /// Slice `i` takes the activity of the last logged interval that
    /// overlaps it; slices nothing overlaps are unknown.
    #[default]
    IntervalOverlap,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "proportional" => Ok(MatchPolicy::Proportional),
            "interval_overlap" | "overlap" => Ok(MatchPolicy::IntervalOverlap),
            other => Err(format!(
                "unknown match policy '{other}' (expected proportional or interval_overlap)"
            )),
        }
    }
}

/// Consecutive log rows where each starts exactly when the previous ended.
#[derive(Debug, Clone)]
pub struct ActivityGroup {
    pub intervals: Vec<ActivityInterval>,
    /// Start of the first activity
    pub start: DateTime<FixedOffset>,
    /// End of the last activity plus padding
    pub end: DateTime<FixedOffset>,
}

impl ActivityGroup {
    /// Number of activities in the group.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// `ID` of the first row.
    pub fn first_id(&self) -> &str {
        self.intervals.first().map(|i| i.id.as_str()).unwrap_or_default()
    }
}

/// Chain log rows into groups. Rows keep their file order.
pub fn group_activities(intervals: &[ActivityInterval], padding: Duration) -> Vec<ActivityGroup> {
    let mut chains: Vec<Vec<ActivityInterval>> = Vec::new();

    for interval in intervals {
        match chains.last_mut() {
            Some(chain) if chain.last().is_some_and(|prev| prev.end == interval.start) => {
                chain.push(interval.clone());
            }
            _ => chains.push(vec![interval.clone()]),
        }
    }

    chains
        .into_iter()
        .filter_map(|chain| {
            let start = chain.first()?.start;
            let end = chain.last()?.end + padding;
            Some(ActivityGroup {
                intervals: chain,
                start,
                end,
            })
        })
        .collect()
}

/// One activity group together with one device's recording of it.
#[derive(Debug, Clone)]
pub struct MatchedSource {
    pub group: ActivityGroup,
    /// Device the samples came from, empty when unknown
    pub device: String,
    /// Keys of the streams the samples came from
    pub stream_keys: Vec<String>,
    /// Time-sorted samples inside the group span
    pub samples: Vec<Sample>,
}

impl MatchedSource {
    /// `<device>_<start>_<end>_<activities>_<streams>`, unique per group
    /// and device. The device part is left out when unknown.
    pub fn key(&self) -> String {
        let span = format!(
            "{}_{}_{}_{}",
            format_stream_stamp(self.group.start),
            format_stream_stamp(self.group.end),
            self.group.len(),
            self.stream_keys.len()
        );
        if self.device.is_empty() {
            span
        } else {
            format!("{}_{span}", self.device)
        }
    }
}

/// Collect the samples of every stream overlapping the group's span,
/// cropped to that span. `streams` must come from a single device.
/// Returns `None` when nothing overlaps.
pub fn match_streams<'a>(
    group: &ActivityGroup,
    streams: impl IntoIterator<Item = &'a Stream>,
) -> Option<MatchedSource> {
    let mut device = String::new();
    let mut stream_keys = Vec::new();
    let mut samples = Vec::new();

    for stream in streams {
        if group.start <= stream.end() && group.end >= stream.start() {
            let inside = samples_between(stream.samples(), group.start, group.end, true);
            if inside.is_empty() {
                continue;
            }
            if stream_keys.is_empty() {
                device = stream.device().to_string();
            }
            stream_keys.push(stream.key());
            samples.extend_from_slice(inside);
        }
    }

    if samples.is_empty() {
        return None;
    }
    samples.sort_by_key(|s| s.timestamp);

    Some(MatchedSource {
        group: group.clone(),
        device,
        stream_keys,
        samples,
    })
}

/// Group the log and match every group against each device's streams.
/// A group yields one source per device that recorded it; groups no
/// device recorded are logged and left out.
pub fn match_sources(
    intervals: &[ActivityInterval],
    streams: &[Stream],
    padding: Duration,
    log: &mut RunLog,
) -> Vec<MatchedSource> {
    let mut by_device: BTreeMap<&str, Vec<&Stream>> = BTreeMap::new();
    for stream in streams {
        by_device.entry(stream.device()).or_default().push(stream);
    }

    let mut sources = Vec::new();
    for group in group_activities(intervals, padding) {
        log.record_group_built();
        let matched: Vec<MatchedSource> = by_device
            .values()
            .filter_map(|device_streams| match_streams(&group, device_streams.iter().copied()))
            .collect();

        if matched.is_empty() {
            warn!(
                "No recording overlaps activity group starting at {} (ID {})",
                group.start,
                group.first_id()
            );
            log.record_group_unmatched();
            continue;
        }

        for source in matched {
            info!(
                "Group {}: {} activities, {} streams, {} samples",
                source.key(),
                group.len(),
                source.stream_keys.len(),
                source.samples.len()
            );
            sources.push(source);
        }
    }

    sources
}

/// Divide `[start, end]` into `count` equal consecutive spans.
pub fn equal_slices(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    count: usize,
) -> Vec<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    if count == 0 {
        return Vec::new();
    }
    let total_us = i128::from((end - start).num_microseconds().unwrap_or(i64::MAX));
    let n = count as i128;
    let boundary = |i: i128| -> DateTime<FixedOffset> {
        if i == n {
            end
        } else {
            start + Duration::microseconds((total_us * i / n) as i64)
        }
    };

    (0..n).map(|i| (boundary(i), boundary(i + 1))).collect()
}

/// Activity of the last interval overlapping `[start, end)`.
pub fn label_window(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    intervals: &[ActivityInterval],
) -> PipelineResult<&str> {
    intervals
        .iter()
        .filter(|interval| interval.overlaps(start, end))
        .last()
        .map(|interval| interval.activity.as_str())
        .ok_or(PipelineError::AlignmentGap { start, end })
}

/// A slice of a source with its resolved activity.
#[derive(Debug, Clone)]
pub struct LabeledSegment<'a> {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// `None` when no logged activity applies
    pub activity: Option<String>,
    pub samples: &'a [Sample],
}

/// Assigns activities to the slices of a matched source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityMatcher {
    policy: MatchPolicy,
}

impl ActivityMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Slice `samples` into one span per activity of `group` and label each.
    ///
    /// Slices are half-open except the last, which is closed, so every
    /// sample lands in exactly one slice. Slices holding no samples are
    /// dropped.
    pub fn label_slices<'a>(
        &self,
        group: &ActivityGroup,
        samples: &'a [Sample],
        log: &mut RunLog,
    ) -> Vec<LabeledSegment<'a>> {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Vec::new();
        };
        let slices = equal_slices(first.timestamp, last.timestamp, group.len());
        let final_index = slices.len().saturating_sub(1);

        let mut segments = Vec::new();
        for (i, (start, end)) in slices.into_iter().enumerate() {
            let inside = samples_between(samples, start, end, i == final_index);
            if inside.is_empty() {
                debug!("slice {i} ({start} .. {end}) holds no samples");
                continue;
            }

            let activity = match self.policy {
                MatchPolicy::Proportional => Some(group.intervals[i].activity.clone()),
                MatchPolicy::IntervalOverlap => match label_window(start, end, &group.intervals) {
                    Ok(activity) => Some(activity.to_string()),
                    Err(e) => {
                        debug!("slice {i}: {e}");
                        None
                    }
                },
            };

            log.record_slice(activity.is_some());
            segments.push(LabeledSegment {
                start,
                end,
                activity,
                samples: inside,
            });
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 9, 5, 10, 0, 0)
            .unwrap()
            + Duration::seconds(secs)
    }

    fn interval(id: &str, activity: &str, start: i64, end: i64) -> ActivityInterval {
        ActivityInterval {
            id: id.to_string(),
            activity: activity.to_string(),
            start: t(start),
            end: t(end),
            source_row: Vec::new(),
        }
    }

    fn samples_every_second(from: i64, to: i64) -> Vec<Sample> {
        (from..=to)
            .map(|s| Sample::new(s as u64, t(s), 0.0, 0.0, 1.0))
            .collect()
    }

    fn stream(from: i64, to: i64) -> Stream {
        Stream::from_samples(samples_every_second(from, to)).unwrap()
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("proportional".parse::<MatchPolicy>(), Ok(MatchPolicy::Proportional));
        assert_eq!("interval-overlap".parse::<MatchPolicy>(), Ok(MatchPolicy::IntervalOverlap));
        assert!("nearest".parse::<MatchPolicy>().is_err());
    }

    #[test]
    fn test_grouping_chains_end_to_start() {
        let intervals = vec![
            interval("1", "A", 0, 60),
            interval("2", "B", 60, 120),
            interval("3", "C", 120, 180),
            interval("4", "D", 600, 660),
        ];
        let groups = group_activities(&intervals, Duration::seconds(60));

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[0].start, t(0));
        assert_eq!(groups[0].end, t(240));
        assert_eq!(groups[1].first_id(), "4");
    }

    #[test]
    fn test_match_streams_crops_to_group_span() {
        let group = group_activities(&[interval("1", "A", 100, 200)], Duration::zero())
            .pop()
            .unwrap();
        let streams = vec![stream(0, 150), stream(180, 300), stream(400, 500)];

        let source = match_streams(&group, &streams).unwrap();
        assert_eq!(source.stream_keys.len(), 2);
        assert_eq!(source.samples.first().unwrap().timestamp, t(100));
        assert_eq!(source.samples.last().unwrap().timestamp, t(200));
        // 100..=150 and 180..=200
        assert_eq!(source.samples.len(), 51 + 21);
    }

    #[test]
    fn test_match_streams_touching_boundary_counts() {
        let group = group_activities(&[interval("1", "A", 100, 200)], Duration::zero())
            .pop()
            .unwrap();
        let source = match_streams(&group, &[stream(200, 300)]).unwrap();
        assert_eq!(source.samples.len(), 1);

        assert!(match_streams(&group, &[stream(201, 300)]).is_none());
    }

    #[test]
    fn test_match_sources_counts_unmatched_groups() {
        let intervals = vec![interval("1", "A", 0, 60), interval("2", "B", 1_000, 1_060)];
        let mut log = RunLog::new();
        let sources = match_sources(&intervals, &[stream(0, 90)], Duration::seconds(60), &mut log);

        assert_eq!(sources.len(), 1);
        assert_eq!(log.stats().groups_built, 2);
        assert_eq!(log.stats().groups_unmatched, 1);
        assert!(sources[0].key().ends_with("_1_1"));
    }

    #[test]
    fn test_match_sources_keeps_devices_apart() {
        let left = Stream::from_samples(
            (0..=90)
                .map(|s| Sample::new(s as u64, t(s), 1.0, 0.0, 1.0))
                .collect(),
        )
        .unwrap()
        .with_device("left");
        let right = Stream::from_samples(
            (0..=90)
                .map(|s| Sample::new(s as u64, t(s), -1.0, 0.0, 1.0))
                .collect(),
        )
        .unwrap()
        .with_device("right");
        let late = stream(1_000, 1_100).with_device("late");

        let intervals = vec![interval("1", "A", 0, 60), interval("2", "B", 1_000, 1_060)];
        let mut log = RunLog::new();
        let sources = match_sources(
            &intervals,
            &[right, late, left],
            Duration::seconds(60),
            &mut log,
        );

        assert_eq!(log.stats().groups_unmatched, 0);
        let devices: Vec<_> = sources.iter().map(|s| s.device.as_str()).collect();
        assert_eq!(devices, vec!["left", "right", "late"]);

        assert_eq!(sources[0].stream_keys.len(), 1);
        assert_eq!(sources[0].samples.len(), 91);
        assert!(sources[0].samples.iter().all(|s| s.x == 1.0));
        assert!(sources[1].samples.iter().all(|s| s.x == -1.0));
        assert!(sources[0].key().starts_with("left_"));
        assert_ne!(sources[0].key(), sources[1].key());
    }

    #[test]
    fn test_equal_slices_cover_span() {
        let slices = equal_slices(t(0), t(10), 3);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].0, t(0));
        assert_eq!(slices[2].1, t(10));
        for pair in slices.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert!(equal_slices(t(0), t(10), 0).is_empty());
    }

    #[test]
    fn test_overlap_boundaries_are_exclusive() {
        let intervals = vec![interval("1", "A", 0, 10), interval("2", "B", 10, 20)];
        assert_eq!(label_window(t(0), t(10), &intervals).unwrap(), "A");
        assert_eq!(label_window(t(10), t(20), &intervals).unwrap(), "B");
    }

    #[test]
    fn test_overlap_last_writer_wins() {
        // B starts one second before the first slice ends, so it overlaps
        // both slices and, being later in the log, wins both.
        let intervals = vec![interval("1", "A", 0, 10), interval("2", "B", 9, 20)];
        assert_eq!(label_window(t(0), t(10), &intervals).unwrap(), "B");
        assert_eq!(label_window(t(10), t(20), &intervals).unwrap(), "B");

        let reversed = vec![interval("2", "B", 9, 20), interval("1", "A", 0, 10)];
        assert_eq!(label_window(t(0), t(10), &reversed).unwrap(), "A");
    }

    #[test]
    fn test_no_overlap_is_alignment_gap() {
        let intervals = vec![interval("1", "A", 0, 10)];
        let err = label_window(t(20), t(30), &intervals).unwrap_err();
        assert!(matches!(err, PipelineError::AlignmentGap { .. }));
    }

    #[test]
    fn test_proportional_policy_follows_log_order() {
        let group = ActivityGroup {
            intervals: vec![interval("1", "A", 500, 510), interval("2", "B", 510, 520)],
            start: t(0),
            end: t(20),
        };
        let samples = samples_every_second(0, 20);
        let mut log = RunLog::new();
        let segments =
            ActivityMatcher::new(MatchPolicy::Proportional).label_slices(&group, &samples, &mut log);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].activity.as_deref(), Some("A"));
        assert_eq!(segments[1].activity.as_deref(), Some("B"));
        // half-open first slice, closed last slice: no sample lost or shared
        assert_eq!(segments[0].samples.len(), 10);
        assert_eq!(segments[1].samples.len(), 11);
    }

    #[test]
    fn test_interval_policy_marks_unknown_slices() {
        let group = ActivityGroup {
            intervals: vec![interval("1", "A", 0, 10), interval("2", "B", 30, 40)],
            start: t(0),
            end: t(20),
        };
        let samples = samples_every_second(0, 20);
        let mut log = RunLog::new();
        let segments = ActivityMatcher::default().label_slices(&group, &samples, &mut log);

        assert_eq!(segments[0].activity.as_deref(), Some("A"));
        assert_eq!(segments[1].activity, None);
        assert_eq!(log.stats().slices_labeled, 1);
        assert_eq!(log.stats().slices_unknown, 1);
    }

    #[test]
    fn test_label_slices_drops_empty_slices() {
        let group = ActivityGroup {
            intervals: vec![
                interval("1", "A", 0, 10),
                interval("2", "B", 10, 20),
                interval("3", "C", 20, 30),
            ],
            start: t(0),
            end: t(30),
        };
        // nothing in the middle third
        let mut samples = samples_every_second(0, 5);
        samples.extend(samples_every_second(25, 30));

        let mut log = RunLog::new();
        let segments = ActivityMatcher::default().label_slices(&group, &samples, &mut log);
        let labels: Vec<_> = segments.iter().map(|s| s.activity.as_deref()).collect();
        assert_eq!(labels, vec![Some("A"), Some("C")]);
    }
}
