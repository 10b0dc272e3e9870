//! Session ledger.
//!
//! Every session and its segments are recorded in SQLite so a crashed or
//! rejected run can be inspected after the fact (`meetrec sessions`).

pub mod init;
pub mod sessions;


pub use init::{init_db, migrate};
pub use sessions::{SegmentRecord, SessionLedger, SessionRecord, SessionRepository};
