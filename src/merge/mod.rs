//! Segment merging.
//!
//! Reassembles the per-presence segments into one recording by stream copy
//! and refuses any result whose size does not add up.

pub mod concat;
pub mod merger;
pub mod probe;

pub use concat::{render_manifest, Concatenator, FfmpegConcat};
pub use merger::{within_tolerance, MergeError, MergeOutcome, MergeSettings, SegmentMerger};
pub use probe::{FfprobeProbe, MediaProbe};
