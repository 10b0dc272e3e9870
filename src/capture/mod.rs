//! Screen and audio capture.
//!
//! Each recording segment is backed by its own encoder process. The recorder
//! starts it once the audio sink is up and stops it through an escalation
//! ladder that never takes longer than the kill deadline.

pub mod ffmpeg;
pub mod process;
pub mod readiness;
pub mod recorder;

pub use ffmpeg::{resolve_binary, CaptureLauncher, FfmpegLauncher};
pub use process::{CaptureError, CaptureProcess, ChildCapture, ExitReport, StopSignal};
pub use readiness::{AlwaysReady, AudioReadiness, PulseAudioReadiness};
pub use recorder::{
    RecorderSettings, SegmentHandle, SegmentHealth, SegmentRecorder, StopLadder, StopReport,
    StopRung, StoppedSegment,
};
