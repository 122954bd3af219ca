//! Sliding time windows over a continuous run of samples.
//!
//! Windows start at the first sample and advance by a fixed step; with a
//! step shorter than the length they overlap. A window owns nothing: it
//! borrows the samples that fall inside `[start, end]`.

use crate::config::ConfigError;
use crate::error::{PipelineError, PipelineResult};
use crate::source::types::Sample;
use chrono::{DateTime, Duration, FixedOffset};

/// A fixed-duration view into a sorted run of samples.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    samples: &'a [Sample],
}

impl<'a> Window<'a> {
    pub fn samples(&self) -> &'a [Sample] {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Samples with `start <= t <= end` (or `< end` when `closed_end` is false)
/// from a time-sorted slice.
pub fn samples_between(
    samples: &[Sample],
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    closed_end: bool,
) -> &[Sample] {
    let lo = samples.partition_point(|s| s.timestamp < start);
    let hi = if closed_end {
        samples.partition_point(|s| s.timestamp <= end)
    } else {
        samples.partition_point(|s| s.timestamp < end)
    };
    if hi <= lo {
        &samples[lo..lo]
    } else {
        &samples[lo..hi]
    }
}

/// Cut `[start, end]` out of `samples`, failing when nothing falls inside.
pub fn window_at(
    samples: &[Sample],
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> PipelineResult<Window<'_>> {
    let inside = samples_between(samples, start, end, true);
    if inside.is_empty() {
        return Err(PipelineError::EmptyWindow { start, end });
    }
    Ok(Window {
        start,
        end,
        samples: inside,
    })
}

/// Splits sample runs into fixed-length, fixed-step windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSplitter {
    length: Duration,
    step: Duration,
}

impl WindowSplitter {
    pub fn new(length: Duration, step: Duration) -> Result<Self, ConfigError> {
        if length <= Duration::zero() || step <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "window length and step must be positive".to_string(),
            ));
        }
        Ok(Self { length, step })
    }

    /// Step derived from an overlap ratio: `step = length * (1 - overlap)`.
    pub fn from_overlap(length: Duration, overlap: f64) -> Result<Self, ConfigError> {
        if !(0.0..1.0).contains(&overlap) {
            return Err(ConfigError::Invalid(format!(
                "overlap {overlap} is outside [0, 1)"
            )));
        }
        let length_us = length.num_microseconds().unwrap_or(i64::MAX);
        let step_us = (length_us as f64 * (1.0 - overlap)).round() as i64;
        Self::new(length, Duration::microseconds(step_us))
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Lazily iterate the non-empty windows of a time-sorted sample run.
    /// The iterator is `Clone`, and calling this again restarts it.
    pub fn windows<'a>(&self, samples: &'a [Sample]) -> Windows<'a> {
        Windows {
            samples,
            length: self.length,
            step: self.step,
            cursor: samples.first().map(|s| s.timestamp),
            last: samples.last().map(|s| s.timestamp),
            empty: 0,
        }
    }
}

/// Iterator returned by [`WindowSplitter::windows`].
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    samples: &'a [Sample],
    length: Duration,
    step: Duration,
    cursor: Option<DateTime<FixedOffset>>,
    last: Option<DateTime<FixedOffset>>,
    empty: u64,
}

impl Windows<'_> {
    /// Windows skipped so far because no sample fell inside them.
    pub fn empty_count(&self) -> u64 {
        self.empty
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cursor = self.cursor?;
            let last = self.last?;
            let end = cursor + self.length;
            if end > last {
                self.cursor = None;
                return None;
            }
            self.cursor = Some(cursor + self.step);

            match window_at(self.samples, cursor, end) {
                Ok(window) => return Some(window),
                Err(_) => self.empty += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 9, 5, 9, 30, 0)
            .unwrap()
            + Duration::milliseconds(ms)
    }

    fn samples_at(ms: &[i64]) -> Vec<Sample> {
        ms.iter()
            .enumerate()
            .map(|(i, &m)| Sample::new(i as u64, t(m), i as f64, 0.0, 0.0))
            .collect()
    }

    fn every_20ms(until_ms: i64) -> Vec<Sample> {
        let ms: Vec<i64> = (0..=until_ms).step_by(20).collect();
        samples_at(&ms)
    }

    #[test]
    fn test_windows_have_exact_length_and_step() {
        let samples = every_20ms(10_000);
        let splitter =
            WindowSplitter::new(Duration::seconds(2), Duration::seconds(1)).unwrap();
        let windows: Vec<_> = splitter.windows(&samples).collect();

        // cursors 0..=8 s
        assert_eq!(windows.len(), 9);
        for window in &windows {
            assert_eq!(window.duration(), Duration::seconds(2));
        }
        for pair in windows.windows(2) {
            assert_eq!(pair[1].start - pair[0].start, Duration::seconds(1));
        }
    }

    #[test]
    fn test_overlapping_windows_share_samples() {
        let samples = every_20ms(4_000);
        let splitter = WindowSplitter::from_overlap(Duration::seconds(2), 0.5).unwrap();
        assert_eq!(splitter.step(), Duration::seconds(1));

        let windows: Vec<_> = splitter.windows(&samples).collect();
        assert_eq!(windows.len(), 3);
        // both ends are inclusive: 0..=2000 ms holds 101 samples
        assert_eq!(windows[0].len(), 101);
        assert_eq!(windows[1].samples()[0].timestamp, t(1_000));
    }

    #[test]
    fn test_empty_windows_are_skipped_but_advanced_past() {
        let samples = samples_at(&[0, 500, 1_000, 9_000, 9_500, 10_000]);
        let splitter =
            WindowSplitter::new(Duration::seconds(1), Duration::seconds(1)).unwrap();
        let mut windows = splitter.windows(&samples);
        let starts: Vec<_> = windows.by_ref().map(|w| w.start).collect();

        assert_eq!(starts, vec![t(0), t(1_000), t(8_000), t(9_000)]);
        assert_eq!(windows.empty_count(), 6);
    }

    #[test]
    fn test_single_window_round_trip() {
        let samples = every_20ms(3_000);
        let duration = samples[samples.len() - 1].timestamp - samples[0].timestamp;
        let splitter = WindowSplitter::new(duration, duration).unwrap();
        let windows: Vec<_> = splitter.windows(&samples).collect();

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].samples(), samples.as_slice());
    }

    #[test]
    fn test_short_run_yields_nothing() {
        let samples = every_20ms(1_000);
        let splitter =
            WindowSplitter::new(Duration::seconds(2), Duration::seconds(1)).unwrap();
        assert_eq!(splitter.windows(&samples).count(), 0);
        assert_eq!(splitter.windows(&[]).count(), 0);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let samples = every_20ms(5_000);
        let splitter =
            WindowSplitter::new(Duration::seconds(2), Duration::milliseconds(500)).unwrap();
        let iter = splitter.windows(&samples);
        let first: Vec<_> = iter.clone().map(|w| w.start).collect();
        let second: Vec<_> = iter.map(|w| w.start).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(WindowSplitter::new(Duration::zero(), Duration::seconds(1)).is_err());
        assert!(WindowSplitter::new(Duration::seconds(1), Duration::seconds(-1)).is_err());
        assert!(WindowSplitter::from_overlap(Duration::seconds(2), 1.0).is_err());
    }

    #[test]
    fn test_window_at_reports_empty() {
        let samples = samples_at(&[0, 5_000]);
        let err = window_at(&samples, t(1_000), t(2_000)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyWindow { .. }));
    }

    #[test]
    fn test_samples_between_open_and_closed() {
        let samples = samples_at(&[0, 1_000, 2_000]);
        assert_eq!(samples_between(&samples, t(0), t(1_000), true).len(), 2);
        assert_eq!(samples_between(&samples, t(0), t(1_000), false).len(), 1);
        assert!(samples_between(&samples, t(2_500), t(3_000), true).is_empty());
    }
}
