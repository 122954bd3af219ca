//! Core functionality for the segmentation pipeline.
//!
//! This module contains:
//! - Time normalization across the device, log and filename clocks
//! - Merging raw chunks into continuous streams
//! - Sliding windows over streams
//! - Alignment of slices and windows with the activity log
//! - Feature computation from windows
//! - Dataset assembly and the stratified split
//! - Optional low-pass denoising

pub mod dataset;
pub mod denoise;
pub mod features;
pub mod matching;
pub mod merge;
pub mod time;
pub mod windowing;

// Re-export commonly used types
pub use dataset::{Dataset, DatasetBuilder, DatasetRow, Split};
pub use denoise::{Denoiser, LowPassFilter};
pub use features::{compute_features, FeatureExtractor, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use matching::{
    group_activities, label_window, match_sources, ActivityGroup, ActivityMatcher, LabeledSegment,
    MatchPolicy, MatchedSource,
};
pub use merge::{Stream, StreamMerger};
pub use time::{TimeNormalizer, Zone};
pub use windowing::{Window, WindowSplitter};
