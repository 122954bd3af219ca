//! Input sources for the pipeline.
//!
//! This module reads raw accelerometer chunks, merged streams and the
//! activity log into validated, fixed-schema records.

pub mod activity_log;
pub mod chunk;
pub mod types;

// Re-export commonly used types
pub use activity_log::read_activity_log;
pub use chunk::{
    device_dirs, list_csv_files, read_chunk, read_chunk_dir, read_samples, read_stream_dir,
};
pub use types::{ActivityInterval, Chunk, Sample};
