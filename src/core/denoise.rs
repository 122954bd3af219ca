//! Zero-phase low-pass filtering of accelerometer axes.
//!
//! A Butterworth low-pass is built as a cascade of second-order sections
//! (plus one first-order section for odd orders) through the bilinear
//! transform. Signals are filtered forward then backward, after padding
//! both ends with an odd reflection, so the output has no phase shift.

use crate::config::{ConfigError, DenoiseConfig};
use crate::source::types::Sample;
use std::f64::consts::PI;
use tracing::{debug, warn};

/// One filter section in transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Delay line of one section.
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl Section {
    fn second_order(k: f64, q: f64) -> Self {
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k * k * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
        }
    }

    fn first_order(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        Self {
            b0: k * norm,
            b1: k * norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    /// State that holds the output at `x` for a constant input `x`.
    /// Valid because every section has unit gain at DC.
    fn steady_state(&self, x: f64) -> SectionState {
        SectionState {
            z1: x * (1.0 - self.b0),
            z2: x * (self.b2 - self.a2),
        }
    }

    fn step(&self, state: &mut SectionState, x: f64) -> f64 {
        let y = self.b0 * x + state.z1;
        state.z1 = self.b1 * x - self.a1 * y + state.z2;
        state.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Butterworth low-pass filter for a fixed sample rate.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    sections: Vec<Section>,
    order: usize,
}

impl LowPassFilter {
    pub fn butterworth(
        cutoff_hz: f64,
        sample_rate_hz: f64,
        order: usize,
    ) -> Result<Self, ConfigError> {
        let nyquist = sample_rate_hz / 2.0;
        if order == 0 || !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(ConfigError::Invalid(format!(
                "cutoff {cutoff_hz} Hz must lie in (0, {nyquist}) Hz and order must be positive"
            )));
        }

        let k = (PI * cutoff_hz / sample_rate_hz).tan();
        let mut sections: Vec<Section> = (1..=order / 2)
            .map(|i| {
                let angle = (2 * i - 1) as f64 * PI / (2 * order) as f64;
                Section::second_order(k, 1.0 / (2.0 * angle.cos()))
            })
            .collect();
        if order % 2 == 1 {
            sections.push(Section::first_order(k));
        }

        Ok(Self { sections, order })
    }

    /// Samples of reflection added to each end before filtering.
    pub fn pad_len(&self) -> usize {
        3 * (self.order + 1)
    }

    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let mut states: Vec<SectionState> =
            self.sections.iter().map(|s| s.steady_state(first)).collect();
        for value in signal.iter_mut() {
            let mut x = *value;
            for (section, state) in self.sections.iter().zip(states.iter_mut()) {
                x = section.step(state, x);
            }
            *value = x;
        }
    }

    /// Forward-backward filter. Returns `None` when the signal is not
    /// longer than the padding.
    pub fn filtfilt(&self, signal: &[f64]) -> Option<Vec<f64>> {
        let pad = self.pad_len();
        let n = signal.len();
        if n <= pad {
            return None;
        }

        let (first, last) = (signal[0], signal[n - 1]);
        let mut padded = Vec::with_capacity(n + 2 * pad);
        padded.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        padded.extend_from_slice(signal);
        padded.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.run(&mut padded);
        padded.reverse();
        self.run(&mut padded);
        padded.reverse();

        Some(padded[pad..pad + n].to_vec())
    }
}

/// Sample rate implied by the mean spacing of time-sorted samples.
pub fn estimate_sample_rate(samples: &[Sample]) -> Option<f64> {
    let (first, last) = (samples.first()?, samples.last()?);
    let span_us = (last.timestamp - first.timestamp).num_microseconds()?;
    if samples.len() < 2 || span_us <= 0 {
        return None;
    }
    let mean_spacing = span_us as f64 / 1e6 / (samples.len() - 1) as f64;
    Some(1.0 / mean_spacing)
}

/// Low-pass filters all three axes of a source in place.
#[derive(Debug, Clone, Copy)]
pub struct Denoiser {
    cutoff_hz: f64,
    order: usize,
}

impl Denoiser {
    pub fn new(cutoff_hz: f64, order: usize) -> Self {
        Self { cutoff_hz, order }
    }

    pub fn from_config(config: &DenoiseConfig) -> Self {
        Self::new(config.cutoff_hz, config.order)
    }

    /// Filter `samples` in place. Returns `false`, leaving the samples
    /// untouched, when the rate cannot be estimated, the cutoff is at or
    /// above Nyquist, or there are too few samples.
    pub fn apply(&self, samples: &mut [Sample]) -> bool {
        let Some(rate) = estimate_sample_rate(samples) else {
            warn!("cannot estimate sample rate; skipping low-pass filter");
            return false;
        };
        let filter = match LowPassFilter::butterworth(self.cutoff_hz, rate, self.order) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("skipping low-pass filter at {rate:.1} Hz: {e}");
                return false;
            }
        };

        let axes = [
            samples.iter().map(|s| s.x).collect::<Vec<_>>(),
            samples.iter().map(|s| s.y).collect::<Vec<_>>(),
            samples.iter().map(|s| s.z).collect::<Vec<_>>(),
        ];
        let filtered: Option<Vec<Vec<f64>>> = axes.iter().map(|a| filter.filtfilt(a)).collect();
        let Some(filtered) = filtered else {
            warn!(
                "{} samples is too few to filter (need more than {})",
                samples.len(),
                filter.pad_len()
            );
            return false;
        };

        for (i, sample) in samples.iter_mut().enumerate() {
            sample.x = filtered[0][i];
            sample.y = filtered[1][i];
            sample.z = filtered[2][i];
        }
        debug!(
            "low-pass {} Hz applied to {} samples at {rate:.1} Hz",
            self.cutoff_hz,
            samples.len()
        );
        true
    }
}
