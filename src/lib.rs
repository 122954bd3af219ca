//! HAR Pipeline - accelerometer segmentation and feature extraction.
//!
//! This library turns fragmented wearable accelerometer recordings and a
//! separately kept activity log into labeled, fixed-size feature windows
//! for activity recognition.
//!
//! # Guarantees
//!
//! - **One clock**: every instant is normalized into a single reference zone
//! - **No interpolation**: windows without samples are dropped, never filled
//! - **Determinism**: the same inputs and seed give the same tables
//! - **No leakage**: train and test rows are disjoint and stratified by label
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HAR Pipeline                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ Raw chunks  │──▶│   Merger    │──▶│  Matcher    │◀── log  │
//! │  │  (source)   │   │  (streams)  │   │  (groups)   │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                │
//! │                                             ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │  Dataset    │◀──│  Features   │◀──│  Windows    │         │
//! │  │  (split)    │   │ (43 values) │   │ (2 s, 50%)  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────┐                     ┌─────────────┐         │
//! │  │   Export    │                     │  Run log    │         │
//! │  │  (tables)   │                     │ (counters)  │         │
//! │  └─────────────┘                     └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use har_pipeline::{Config, Pipeline, Recording, RunLog};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::new(Config::default()).expect("valid config");
//! let mut log = RunLog::new();
//! let output = pipeline
//!     .run(
//!         &Recording::Raw("data/raw".into()),
//!         Path::new("data/TrainActivities.csv"),
//!         &mut log,
//!     )
//!     .expect("pipeline run");
//! println!("{} rows, summary at {:?}", output.rows, output.summary);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod report;
pub mod source;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use crate::core::{
    ActivityMatcher, Dataset, DatasetBuilder, FeatureExtractor, FeatureVector, MatchPolicy,
    Stream, StreamMerger, TimeNormalizer, WindowSplitter, Zone, FEATURE_COUNT, FEATURE_NAMES,
};
pub use error::{ParseError, PipelineError, PipelineResult, TimeFormat};
pub use pipeline::{Pipeline, Recording, RunOutput};
pub use report::{RunLog, RunStats};
pub use source::{ActivityInterval, Chunk, Sample};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
