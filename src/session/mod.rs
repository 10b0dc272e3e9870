//! Recording session: state machine, records and shared status.

pub mod clock;
pub mod controller;
pub mod model;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    ControllerSettings, SessionController, SessionError, SessionParts, SessionReport, UploadStatus,
};
pub use model::{FinalArtifact, MeetingSession, Segment, SegmentStatus, SessionState};
pub use status::{SessionStatus, SessionStatusHandle};
