//! Run accounting for the segmentation pipeline.
//!
//! Every recoverable drop (unparsable file, redundant fragment, empty
//! window, unknown label) is counted here so a run can be audited after
//! the fact.

pub mod log;

pub use log::{RunLog, RunStats};
