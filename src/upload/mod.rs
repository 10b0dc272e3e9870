//! Upload gate and object storage.

pub mod gate;
pub mod store;

pub use gate::{GateRejection, GateSettings, UploadError, UploadGate, UploadReceipt, MIN_ARTIFACT_BYTES};
pub use store::{HttpObjectStore, LocalObjectStore, ObjectStore};
