//! API route modules.

pub mod status;
