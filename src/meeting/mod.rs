//! Meeting room collaborator.
//!
//! Joins the conference through a browser driver and reports how many remote
//! participants are present.

pub mod client;
pub mod participants;

pub use client::{HttpMeetingClient, MediaTile, MeetingClient};
pub use participants::ParticipantMonitor;
