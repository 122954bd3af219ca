//! Feature computation from sample windows.
//!
//! Every window becomes a fixed-order vector of [`FEATURE_COUNT`] values:
//! per-axis mean, standard deviation, average absolute deviation, mean
//! interval between peaks and a 10-bin histogram, plus the mean resultant
//! acceleration. Column order follows [`FEATURE_NAMES`].

use crate::core::windowing::{Window, WindowSplitter};
use crate::report::RunLog;
use crate::source::types::Sample;
use chrono::{DateTime, FixedOffset};
use statrs::statistics::Statistics;

/// Number of histogram bins per axis.
pub const HISTOGRAM_BINS: usize = 10;

/// Length of every feature vector.
pub const FEATURE_COUNT: usize = 13 + 3 * HISTOGRAM_BINS;

/// Column names, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "X_mean",
    "X_std",
    "Y_mean",
    "Y_std",
    "Z_mean",
    "Z_std",
    "X_aad",
    "Y_aad",
    "Z_aad",
    "avg_resultant_acc",
    "X_peak_interval_ms",
    "Y_peak_interval_ms",
    "Z_peak_interval_ms",
    "X_bin_0",
    "X_bin_1",
    "X_bin_2",
    "X_bin_3",
    "X_bin_4",
    "X_bin_5",
    "X_bin_6",
    "X_bin_7",
    "X_bin_8",
    "X_bin_9",
    "Y_bin_0",
    "Y_bin_1",
    "Y_bin_2",
    "Y_bin_3",
    "Y_bin_4",
    "Y_bin_5",
    "Y_bin_6",
    "Y_bin_7",
    "Y_bin_8",
    "Y_bin_9",
    "Z_bin_0",
    "Z_bin_1",
    "Z_bin_2",
    "Z_bin_3",
    "Z_bin_4",
    "Z_bin_5",
    "Z_bin_6",
    "Z_bin_7",
    "Z_bin_8",
    "Z_bin_9",
];

/// Features of one window with the label and provenance of that window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub values: [f64; FEATURE_COUNT],
    pub label: i32,
    pub window_start: DateTime<FixedOffset>,
    pub window_end: DateTime<FixedOffset>,
    /// Key of the source the window was cut from
    pub source: String,
}

/// Statistics of one axis.
#[derive(Debug, Clone, Default)]
struct AxisFeatures {
    mean: f64,
    std: f64,
    aad: f64,
    peak_interval_ms: f64,
    histogram: [f64; HISTOGRAM_BINS],
}

fn axis_features(values: &[f64], samples: &[Sample]) -> AxisFeatures {
    let mean = values.iter().mean();
    let std = values.iter().population_std_dev();
    let aad = values.iter().map(|v| (v - mean).abs()).mean();

    AxisFeatures {
        mean,
        std: if std.is_finite() { std } else { 0.0 },
        aad,
        peak_interval_ms: peak_interval_ms(values, samples),
        histogram: histogram(values),
    }
}

/// Indices of strict local maxima (interior points above both neighbors).
fn peak_indices(values: &[f64]) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    (1..values.len() - 1)
        .filter(|&i| values[i] > values[i - 1] && values[i] > values[i + 1])
        .collect()
}

/// Mean time between consecutive peaks, in milliseconds. Zero with fewer
/// than two peaks.
fn peak_interval_ms(values: &[f64], samples: &[Sample]) -> f64 {
    let peaks = peak_indices(values);
    if peaks.len() < 2 {
        return 0.0;
    }
    peaks
        .windows(2)
        .map(|pair| {
            let gap = samples[pair[1]].timestamp - samples[pair[0]].timestamp;
            gap.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
        })
        .mean()
}

/// Share of values in each of [`HISTOGRAM_BINS`] equal bins over
/// `[min, max]`. The last bin includes `max`; a flat axis puts everything
/// in the first bin.
fn histogram(values: &[f64]) -> [f64; HISTOGRAM_BINS] {
    let mut bins = [0.0; HISTOGRAM_BINS];
    if values.is_empty() {
        return bins;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        bins[0] = 1.0;
        return bins;
    }

    for &v in values {
        let bin = (((v - min) / range) * HISTOGRAM_BINS as f64) as usize;
        bins[bin.min(HISTOGRAM_BINS - 1)] += 1.0;
    }
    let total = values.len() as f64;
    for bin in &mut bins {
        *bin /= total;
    }
    bins
}

/// Compute the feature values of a time-sorted run of samples. Returns
/// `None` for an empty run.
pub fn compute_features(samples: &[Sample]) -> Option<[f64; FEATURE_COUNT]> {
    if samples.is_empty() {
        return None;
    }

    let xs: Vec<f64> = samples.iter().map(|s| s.x).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.y).collect();
    let zs: Vec<f64> = samples.iter().map(|s| s.z).collect();
    let axes = [
        axis_features(&xs, samples),
        axis_features(&ys, samples),
        axis_features(&zs, samples),
    ];
    let resultant = samples.iter().map(Sample::magnitude).mean();

    let mut values = [0.0; FEATURE_COUNT];
    for (i, axis) in axes.iter().enumerate() {
        values[2 * i] = axis.mean;
        values[2 * i + 1] = axis.std;
        values[6 + i] = axis.aad;
        values[10 + i] = axis.peak_interval_ms;
        let offset = 13 + i * HISTOGRAM_BINS;
        values[offset..offset + HISTOGRAM_BINS].copy_from_slice(&axis.histogram);
    }
    values[9] = resultant;

    for v in &mut values {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    Some(values)
}

/// Cuts labeled runs of samples into windows and computes their features.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    splitter: WindowSplitter,
}

impl FeatureExtractor {
    pub fn new(splitter: WindowSplitter) -> Self {
        Self { splitter }
    }

    pub fn splitter(&self) -> &WindowSplitter {
        &self.splitter
    }

    /// Features of a single window.
    pub fn extract(&self, window: &Window<'_>, label: i32, source: &str) -> Option<FeatureVector> {
        compute_features(window.samples()).map(|values| FeatureVector {
            values,
            label,
            window_start: window.start,
            window_end: window.end,
            source: source.to_string(),
        })
    }

    /// One vector per non-empty window of `samples`, all carrying `label`.
    pub fn extract_all(
        &self,
        samples: &[Sample],
        label: i32,
        source: &str,
        log: &mut RunLog,
    ) -> Vec<FeatureVector> {
        let mut windows = self.splitter.windows(samples);
        let vectors: Vec<FeatureVector> = windows
            .by_ref()
            .filter_map(|window| self.extract(&window, label, source))
            .collect();
        log.record_windows(vectors.len() as u64, windows.empty_count());
        vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 9, 5, 9, 30, 0)
            .unwrap()
            + Duration::milliseconds(ms)
    }

    fn samples_from_x(xs: &[f64], spacing_ms: i64) -> Vec<Sample> {
        xs.iter()
            .enumerate()
            .map(|(i, &x)| Sample::new(i as u64, t(i as i64 * spacing_ms), x, 0.0, 1.0))
            .collect()
    }

    fn index(name: &str) -> usize {
        FEATURE_NAMES.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn test_feature_names_match_count() {
        assert_eq!(FEATURE_COUNT, 43);
        assert_eq!(FEATURE_NAMES[0], "X_mean");
        assert_eq!(FEATURE_NAMES[9], "avg_resultant_acc");
        assert_eq!(FEATURE_NAMES[12], "Z_peak_interval_ms");
        assert_eq!(FEATURE_NAMES[13], "X_bin_0");
        assert_eq!(FEATURE_NAMES[FEATURE_COUNT - 1], "Z_bin_9");
    }

    #[test]
    fn test_peak_interval_example() {
        // peaks at indices 1 and 3, 20 ms apart
        let samples = samples_from_x(&[1.0, 3.0, 2.0, 4.0, 1.0], 10);
        let values = compute_features(&samples).unwrap();
        assert!((values[index("X_peak_interval_ms")] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_fewer_than_two_peaks_is_zero() {
        let samples = samples_from_x(&[1.0, 3.0, 2.0, 2.0, 2.0], 10);
        let values = compute_features(&samples).unwrap();
        assert_eq!(values[index("X_peak_interval_ms")], 0.0);
        // plateaus are not peaks
        assert!(peak_indices(&[1.0, 2.0, 2.0, 1.0]).is_empty());
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let samples = samples_from_x(&[0.0, 0.5, 1.0, 2.5, 9.9, 10.0, 3.3], 20);
        let values = compute_features(&samples).unwrap();
        let start = index("X_bin_0");
        let sum: f64 = values[start..start + HISTOGRAM_BINS].iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // 10.0 is the maximum and lands in the last bin with 9.9
        assert!((values[index("X_bin_9")] - 2.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_axis_histogram() {
        let samples = samples_from_x(&[2.0, 2.0, 2.0], 20);
        let values = compute_features(&samples).unwrap();
        assert_eq!(values[index("Z_bin_0")], 1.0);
        assert_eq!(values[index("Z_bin_1")], 0.0);
        assert_eq!(values[index("X_std")], 0.0);
        assert_eq!(values[index("X_aad")], 0.0);
    }

    #[test]
    fn test_basic_statistics() {
        let samples: Vec<Sample> = [(3.0, 4.0), (-3.0, -4.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| Sample::new(i as u64, t(i as i64 * 20), x, y, 0.0))
            .collect();
        let values = compute_features(&samples).unwrap();

        assert_eq!(values[index("X_mean")], 0.0);
        assert!((values[index("X_std")] - 3.0).abs() < 1e-9);
        assert!((values[index("Y_aad")] - 4.0).abs() < 1e-9);
        assert!((values[index("avg_resultant_acc")] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_is_finite() {
        let samples = samples_from_x(&[1.5], 20);
        let values = compute_features(&samples).unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(compute_features(&[]).is_none());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let xs: Vec<f64> = (0..300).map(|i| (i as f64 * 0.3).sin()).collect();
        let samples = samples_from_x(&xs, 20);
        let a = compute_features(&samples).unwrap();
        let b = compute_features(&samples).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_all_windows_and_counts() {
        let xs: Vec<f64> = (0..=250).map(|i| (i as f64 * 0.2).sin()).collect();
        let samples = samples_from_x(&xs, 20);
        let splitter = WindowSplitter::from_overlap(Duration::seconds(2), 0.5).unwrap();
        let extractor = FeatureExtractor::new(splitter);

        let mut log = RunLog::new();
        let vectors = extractor.extract_all(&samples, 3, "src", &mut log);

        // 5 s of data, 2 s windows every 1 s
        assert_eq!(vectors.len(), 4);
        assert!(vectors.iter().all(|v| v.label == 3 && v.source == "src"));
        assert_eq!(vectors[1].window_start, t(1_000));
        assert_eq!(log.stats().windows_emitted, 4);
    }
}
